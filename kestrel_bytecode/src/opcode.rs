//! Stack-machine opcodes.
//!
//! Every instruction is one 16-bit code unit: an 8-bit opcode and an 8-bit
//! argument. Arguments wider than 8 bits are built from `EXTENDED_ARG`
//! prefixes, most significant byte first.
//!
//! The numbering leaves room for the adaptive variants installed by
//! quickening. Adaptive variants share the stack effect of their base opcode.

use std::fmt;

/// Opcodes at or above this value carry a meaningful argument.
pub const HAVE_ARGUMENT: u8 = 90;

/// How a jump opcode encodes its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpKind {
    /// The argument is an instruction index.
    Absolute,
    /// The argument is a distance from the following instruction.
    Relative,
}

/// Opcode enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    // =========================================================================
    // Stack Manipulation
    // =========================================================================
    /// Discard TOS.
    PopTop = 1,
    /// Swap the two topmost items.
    RotTwo = 2,
    /// Rotate the three topmost items.
    RotThree = 3,
    /// Duplicate TOS.
    DupTop = 4,
    /// Duplicate the two topmost items.
    DupTopTwo = 5,
    /// Rotate the four topmost items.
    RotFour = 6,
    /// No operation.
    Nop = 9,

    // =========================================================================
    // Unary / Binary Operations
    // =========================================================================
    /// `+TOS`
    UnaryPositive = 10,
    /// `-TOS`
    UnaryNegative = 11,
    /// `not TOS`
    UnaryNot = 12,
    /// `~TOS`
    UnaryInvert = 15,
    /// `TOS1 ** TOS`
    BinaryPower = 19,
    /// `TOS1 * TOS`
    BinaryMultiply = 20,
    /// `TOS1 % TOS`
    BinaryModulo = 22,
    /// `TOS1 + TOS`
    BinaryAdd = 23,
    /// `TOS1 - TOS`
    BinarySubtract = 24,
    /// `TOS1[TOS]`
    BinarySubscr = 25,
    /// `TOS1 // TOS`
    BinaryFloorDivide = 26,
    /// `TOS1 / TOS`
    BinaryTrueDivide = 27,
    /// Push `len(TOS)`.
    GetLen = 30,
    /// `TOS1 += TOS`
    InplaceAdd = 55,
    /// `TOS1 -= TOS`
    InplaceSubtract = 56,
    /// `TOS1[TOS] = TOS2`
    StoreSubscr = 60,
    /// `del TOS1[TOS]`
    DeleteSubscr = 61,

    // =========================================================================
    // Exceptions
    // =========================================================================
    /// Push the three values describing the exception being handled.
    PushExcInfo = 35,
    /// Restore the previous exception and re-raise.
    PopExceptAndReraise = 37,
    /// Pop the three exception values pushed by `PushExcInfo`.
    PopExcept = 89,
    /// Re-raise the exception on the stack.
    Reraise = 119,
    /// Pop two; jump to the argument if the exception does not match.
    JumpIfNotExcMatch = 121,
    /// Raise with 0-2 arguments.
    RaiseVarargs = 130,
    /// Push `AssertionError`.
    LoadAssertionError = 74,

    // =========================================================================
    // Iteration & Generators
    // =========================================================================
    /// Replace the async iterable on TOS with its iterator.
    GetAiter = 50,
    /// Push the awaitable for the next async item.
    GetAnext = 51,
    /// Enter an async `with` block.
    BeforeAsyncWith = 52,
    /// Enter a `with` block.
    BeforeWith = 53,
    /// Terminate an `async for` loop.
    EndAsyncFor = 54,
    /// Replace the iterable on TOS with its iterator.
    GetIter = 68,
    /// Iterator for `yield from`.
    GetYieldFromIter = 69,
    /// Delegate to a sub-iterator.
    YieldFrom = 72,
    /// Replace TOS with its awaitable.
    GetAwaitable = 73,
    /// Yield TOS.
    YieldValue = 86,
    /// Advance the iterator on TOS or jump past the loop.
    ForIter = 93,
    /// Generator entry point.
    GenStart = 129,

    // =========================================================================
    // Returns / Misc without argument
    // =========================================================================
    /// Print TOS (interactive mode).
    PrintExpr = 70,
    /// Push `builtins.__build_class__`.
    LoadBuildClass = 71,
    /// Return TOS to the caller.
    ReturnValue = 83,
    /// `from module import *`
    ImportStar = 84,
    /// Create `__annotations__`.
    SetupAnnotations = 85,

    // =========================================================================
    // Names & Attributes
    // =========================================================================
    /// `name = TOS`
    StoreName = 90,
    /// `del name`
    DeleteName = 91,
    /// Unpack TOS into `arg` values.
    UnpackSequence = 92,
    /// Unpack with a starred target.
    UnpackEx = 94,
    /// `TOS.name = TOS1`
    StoreAttr = 95,
    /// `del TOS.name`
    DeleteAttr = 96,
    /// `global name = TOS`
    StoreGlobal = 97,
    /// `del global name`
    DeleteGlobal = 98,
    /// Rotate the `arg` topmost items.
    RotN = 99,
    /// Push `consts[arg]`.
    LoadConst = 100,
    /// Push the value bound to `names[arg]`.
    LoadName = 101,
    /// Replace TOS with `TOS.name`.
    LoadAttr = 106,
    /// Push the global `names[arg]`.
    LoadGlobal = 116,
    /// Push the method `TOS.name` for a following `CallMethod`.
    LoadMethod = 160,

    // =========================================================================
    // Builders
    // =========================================================================
    /// Build a tuple from `arg` items.
    BuildTuple = 102,
    /// Build a list from `arg` items.
    BuildList = 103,
    /// Build a set from `arg` items.
    BuildSet = 104,
    /// Build a dict from `arg` pairs.
    BuildMap = 105,
    /// Build a slice from 2 or 3 items.
    BuildSlice = 133,
    /// Build a dict from values and a key tuple.
    BuildConstKeyMap = 156,
    /// Concatenate `arg` strings.
    BuildString = 157,
    /// Format a value for an f-string.
    FormatValue = 155,
    /// `list.append` for comprehensions.
    ListAppend = 145,
    /// `set.add` for comprehensions.
    SetAdd = 146,
    /// `dict[key] = value` for comprehensions.
    MapAdd = 147,
    /// `list.extend(TOS)`.
    ListExtend = 162,
    /// `set.update(TOS)`.
    SetUpdate = 163,
    /// Merge TOS into a call's keyword dict.
    DictMerge = 164,
    /// `dict.update(TOS)`.
    DictUpdate = 165,

    // =========================================================================
    // Comparison
    // =========================================================================
    /// Rich comparison.
    CompareOp = 107,
    /// `is` / `is not`.
    IsOp = 117,
    /// `in` / `not in`.
    ContainsOp = 118,

    // =========================================================================
    // Imports
    // =========================================================================
    /// Import a module.
    ImportName = 108,
    /// Load an attribute from the module on TOS.
    ImportFrom = 109,

    // =========================================================================
    // Jumps
    // =========================================================================
    /// Jump forward by `arg` instructions.
    JumpForward = 110,
    /// Jump if TOS is false, else pop.
    JumpIfFalseOrPop = 111,
    /// Jump if TOS is true, else pop.
    JumpIfTrueOrPop = 112,
    /// Jump to instruction `arg`.
    JumpAbsolute = 113,
    /// Pop TOS; jump if false.
    PopJumpIfFalse = 114,
    /// Pop TOS; jump if true.
    PopJumpIfTrue = 115,

    // =========================================================================
    // Locals, Cells & Free Variables
    // =========================================================================
    /// Push local slot `arg`.
    LoadFast = 124,
    /// Store TOS into local slot `arg`.
    StoreFast = 125,
    /// Clear local slot `arg`.
    DeleteFast = 126,
    /// Wrap local slot `arg` in a new cell.
    MakeCell = 135,
    /// Push the cell in slot `arg`.
    LoadClosure = 136,
    /// Push the content of the cell in slot `arg`.
    LoadDeref = 137,
    /// Store TOS into the cell in slot `arg`.
    StoreDeref = 138,
    /// Empty the cell in slot `arg`.
    DeleteDeref = 139,
    /// `LoadDeref` that consults the class namespace first.
    LoadClassderef = 148,

    // =========================================================================
    // Calls & Functions
    // =========================================================================
    /// Call with `arg` positional arguments.
    CallFunction = 131,
    /// Create a function object.
    MakeFunction = 132,
    /// Call with keyword names on TOS.
    CallFunctionKw = 141,
    /// Call with unpacked positional and keyword arguments.
    CallFunctionEx = 142,
    /// Call a method loaded by `LoadMethod`.
    CallMethod = 161,

    // =========================================================================
    // Prefix
    // =========================================================================
    /// Extend the argument of the next instruction by 8 bits.
    ExtendedArg = 144,

    // =========================================================================
    // Adaptive Variants (installed by quickening)
    // =========================================================================
    /// Adaptive `LoadAttr`.
    LoadAttrAdaptive = 170,
    /// Adaptive `LoadGlobal`.
    LoadGlobalAdaptive = 171,
    /// Adaptive `LoadMethod`.
    LoadMethodAdaptive = 172,
    /// Adaptive `StoreAttr`.
    StoreAttrAdaptive = 173,
    /// Adaptive `CallFunction`.
    CallFunctionAdaptive = 174,
    /// Adaptive `BinarySubscr`.
    BinarySubscrAdaptive = 175,
}

impl Opcode {
    /// Decode an opcode byte.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            1 => Opcode::PopTop,
            2 => Opcode::RotTwo,
            3 => Opcode::RotThree,
            4 => Opcode::DupTop,
            5 => Opcode::DupTopTwo,
            6 => Opcode::RotFour,
            9 => Opcode::Nop,
            10 => Opcode::UnaryPositive,
            11 => Opcode::UnaryNegative,
            12 => Opcode::UnaryNot,
            15 => Opcode::UnaryInvert,
            19 => Opcode::BinaryPower,
            20 => Opcode::BinaryMultiply,
            22 => Opcode::BinaryModulo,
            23 => Opcode::BinaryAdd,
            24 => Opcode::BinarySubtract,
            25 => Opcode::BinarySubscr,
            26 => Opcode::BinaryFloorDivide,
            27 => Opcode::BinaryTrueDivide,
            30 => Opcode::GetLen,
            35 => Opcode::PushExcInfo,
            37 => Opcode::PopExceptAndReraise,
            50 => Opcode::GetAiter,
            51 => Opcode::GetAnext,
            52 => Opcode::BeforeAsyncWith,
            53 => Opcode::BeforeWith,
            54 => Opcode::EndAsyncFor,
            55 => Opcode::InplaceAdd,
            56 => Opcode::InplaceSubtract,
            60 => Opcode::StoreSubscr,
            61 => Opcode::DeleteSubscr,
            68 => Opcode::GetIter,
            69 => Opcode::GetYieldFromIter,
            70 => Opcode::PrintExpr,
            71 => Opcode::LoadBuildClass,
            72 => Opcode::YieldFrom,
            73 => Opcode::GetAwaitable,
            74 => Opcode::LoadAssertionError,
            83 => Opcode::ReturnValue,
            84 => Opcode::ImportStar,
            85 => Opcode::SetupAnnotations,
            86 => Opcode::YieldValue,
            89 => Opcode::PopExcept,
            90 => Opcode::StoreName,
            91 => Opcode::DeleteName,
            92 => Opcode::UnpackSequence,
            93 => Opcode::ForIter,
            94 => Opcode::UnpackEx,
            95 => Opcode::StoreAttr,
            96 => Opcode::DeleteAttr,
            97 => Opcode::StoreGlobal,
            98 => Opcode::DeleteGlobal,
            99 => Opcode::RotN,
            100 => Opcode::LoadConst,
            101 => Opcode::LoadName,
            102 => Opcode::BuildTuple,
            103 => Opcode::BuildList,
            104 => Opcode::BuildSet,
            105 => Opcode::BuildMap,
            106 => Opcode::LoadAttr,
            107 => Opcode::CompareOp,
            108 => Opcode::ImportName,
            109 => Opcode::ImportFrom,
            110 => Opcode::JumpForward,
            111 => Opcode::JumpIfFalseOrPop,
            112 => Opcode::JumpIfTrueOrPop,
            113 => Opcode::JumpAbsolute,
            114 => Opcode::PopJumpIfFalse,
            115 => Opcode::PopJumpIfTrue,
            116 => Opcode::LoadGlobal,
            117 => Opcode::IsOp,
            118 => Opcode::ContainsOp,
            119 => Opcode::Reraise,
            121 => Opcode::JumpIfNotExcMatch,
            124 => Opcode::LoadFast,
            125 => Opcode::StoreFast,
            126 => Opcode::DeleteFast,
            129 => Opcode::GenStart,
            130 => Opcode::RaiseVarargs,
            131 => Opcode::CallFunction,
            132 => Opcode::MakeFunction,
            133 => Opcode::BuildSlice,
            135 => Opcode::MakeCell,
            136 => Opcode::LoadClosure,
            137 => Opcode::LoadDeref,
            138 => Opcode::StoreDeref,
            139 => Opcode::DeleteDeref,
            141 => Opcode::CallFunctionKw,
            142 => Opcode::CallFunctionEx,
            144 => Opcode::ExtendedArg,
            145 => Opcode::ListAppend,
            146 => Opcode::SetAdd,
            147 => Opcode::MapAdd,
            148 => Opcode::LoadClassderef,
            155 => Opcode::FormatValue,
            156 => Opcode::BuildConstKeyMap,
            157 => Opcode::BuildString,
            160 => Opcode::LoadMethod,
            161 => Opcode::CallMethod,
            162 => Opcode::ListExtend,
            163 => Opcode::SetUpdate,
            164 => Opcode::DictMerge,
            165 => Opcode::DictUpdate,
            170 => Opcode::LoadAttrAdaptive,
            171 => Opcode::LoadGlobalAdaptive,
            172 => Opcode::LoadMethodAdaptive,
            173 => Opcode::StoreAttrAdaptive,
            174 => Opcode::CallFunctionAdaptive,
            175 => Opcode::BinarySubscrAdaptive,
            _ => return None,
        })
    }

    /// Raw opcode byte.
    #[inline(always)]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Whether the argument byte is meaningful.
    #[inline]
    #[must_use]
    pub const fn has_arg(self) -> bool {
        self as u8 >= HAVE_ARGUMENT
    }

    /// The opcode an adaptive variant was derived from.
    #[must_use]
    pub const fn base(self) -> Opcode {
        match self {
            Opcode::LoadAttrAdaptive => Opcode::LoadAttr,
            Opcode::LoadGlobalAdaptive => Opcode::LoadGlobal,
            Opcode::LoadMethodAdaptive => Opcode::LoadMethod,
            Opcode::StoreAttrAdaptive => Opcode::StoreAttr,
            Opcode::CallFunctionAdaptive => Opcode::CallFunction,
            Opcode::BinarySubscrAdaptive => Opcode::BinarySubscr,
            other => other,
        }
    }

    /// Whether this is an adaptive variant.
    #[inline]
    #[must_use]
    pub const fn is_adaptive(self) -> bool {
        self as u8 != self.base() as u8
    }

    /// How the argument of a jump names its target, or `None` for non-jumps.
    #[must_use]
    pub const fn jump_kind(self) -> Option<JumpKind> {
        match self {
            Opcode::JumpAbsolute
            | Opcode::PopJumpIfFalse
            | Opcode::PopJumpIfTrue
            | Opcode::JumpIfFalseOrPop
            | Opcode::JumpIfTrueOrPop
            | Opcode::JumpIfNotExcMatch => Some(JumpKind::Absolute),
            Opcode::JumpForward | Opcode::ForIter => Some(JumpKind::Relative),
            _ => None,
        }
    }

    /// Whether control never falls through to the next instruction.
    #[must_use]
    pub const fn ends_block(self) -> bool {
        matches!(
            self,
            Opcode::ReturnValue
                | Opcode::RaiseVarargs
                | Opcode::Reraise
                | Opcode::PopExceptAndReraise
                | Opcode::JumpAbsolute
                | Opcode::JumpForward
        )
    }

    /// Net effect on the evaluation stack.
    ///
    /// For branches this is the larger of the taken and not-taken effects.
    #[must_use]
    pub const fn stack_effect(self, oparg: u32) -> i32 {
        let oparg = oparg as i32;
        match self.base() {
            Opcode::Nop
            | Opcode::ExtendedArg
            | Opcode::RotTwo
            | Opcode::RotThree
            | Opcode::RotFour
            | Opcode::RotN
            | Opcode::UnaryPositive
            | Opcode::UnaryNegative
            | Opcode::UnaryNot
            | Opcode::UnaryInvert
            | Opcode::GetIter
            | Opcode::GetAiter
            | Opcode::GetYieldFromIter
            | Opcode::GetAwaitable
            | Opcode::YieldValue
            | Opcode::SetupAnnotations
            | Opcode::DeleteName
            | Opcode::DeleteGlobal
            | Opcode::DeleteFast
            | Opcode::DeleteDeref
            | Opcode::MakeCell
            | Opcode::LoadAttr
            | Opcode::JumpForward
            | Opcode::JumpAbsolute
            | Opcode::JumpIfFalseOrPop
            | Opcode::JumpIfTrueOrPop => 0,

            Opcode::DupTop
            | Opcode::GetLen
            | Opcode::GetAnext
            | Opcode::LoadBuildClass
            | Opcode::LoadAssertionError
            | Opcode::LoadConst
            | Opcode::LoadName
            | Opcode::LoadGlobal
            | Opcode::LoadFast
            | Opcode::LoadClosure
            | Opcode::LoadDeref
            | Opcode::LoadClassderef
            | Opcode::LoadMethod
            | Opcode::ImportFrom
            | Opcode::BeforeAsyncWith
            | Opcode::BeforeWith
            | Opcode::ForIter => 1,

            Opcode::DupTopTwo => 2,
            Opcode::PushExcInfo => 3,

            Opcode::PopTop
            | Opcode::BinaryPower
            | Opcode::BinaryMultiply
            | Opcode::BinaryModulo
            | Opcode::BinaryAdd
            | Opcode::BinarySubtract
            | Opcode::BinarySubscr
            | Opcode::BinaryFloorDivide
            | Opcode::BinaryTrueDivide
            | Opcode::InplaceAdd
            | Opcode::InplaceSubtract
            | Opcode::PrintExpr
            | Opcode::ReturnValue
            | Opcode::ImportStar
            | Opcode::YieldFrom
            | Opcode::StoreName
            | Opcode::StoreGlobal
            | Opcode::StoreFast
            | Opcode::StoreDeref
            | Opcode::DeleteAttr
            | Opcode::CompareOp
            | Opcode::IsOp
            | Opcode::ContainsOp
            | Opcode::ImportName
            | Opcode::PopJumpIfFalse
            | Opcode::PopJumpIfTrue
            | Opcode::GenStart
            | Opcode::ListAppend
            | Opcode::SetAdd
            | Opcode::ListExtend
            | Opcode::SetUpdate
            | Opcode::DictMerge
            | Opcode::DictUpdate => -1,

            Opcode::StoreAttr
            | Opcode::DeleteSubscr
            | Opcode::MapAdd
            | Opcode::JumpIfNotExcMatch => -2,

            Opcode::StoreSubscr | Opcode::PopExcept | Opcode::Reraise => -3,
            Opcode::EndAsyncFor => -4,
            Opcode::PopExceptAndReraise => -7,

            Opcode::UnpackSequence => oparg - 1,
            Opcode::UnpackEx => (oparg & 0xFF) + (oparg >> 8),
            Opcode::BuildTuple | Opcode::BuildList | Opcode::BuildSet | Opcode::BuildString => {
                1 - oparg
            }
            Opcode::BuildMap => 1 - 2 * oparg,
            Opcode::BuildConstKeyMap => -oparg,
            Opcode::BuildSlice => {
                if oparg == 3 {
                    -2
                } else {
                    -1
                }
            }
            Opcode::FormatValue => {
                if oparg & 0x04 != 0 {
                    -1
                } else {
                    0
                }
            }
            Opcode::RaiseVarargs => -oparg,
            Opcode::CallFunction => -oparg,
            Opcode::CallMethod | Opcode::CallFunctionKw => -oparg - 1,
            Opcode::CallFunctionEx => -1 - (oparg & 0x01),
            Opcode::MakeFunction => -1 - (oparg & 0x0F).count_ones() as i32,

            // Adaptive variants are folded into their base above.
            Opcode::LoadAttrAdaptive
            | Opcode::LoadGlobalAdaptive
            | Opcode::LoadMethodAdaptive
            | Opcode::StoreAttrAdaptive
            | Opcode::CallFunctionAdaptive
            | Opcode::BinarySubscrAdaptive => 0,
        }
    }

    /// Upper-case mnemonic.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Opcode::PopTop => "POP_TOP",
            Opcode::RotTwo => "ROT_TWO",
            Opcode::RotThree => "ROT_THREE",
            Opcode::DupTop => "DUP_TOP",
            Opcode::DupTopTwo => "DUP_TOP_TWO",
            Opcode::RotFour => "ROT_FOUR",
            Opcode::Nop => "NOP",
            Opcode::UnaryPositive => "UNARY_POSITIVE",
            Opcode::UnaryNegative => "UNARY_NEGATIVE",
            Opcode::UnaryNot => "UNARY_NOT",
            Opcode::UnaryInvert => "UNARY_INVERT",
            Opcode::BinaryPower => "BINARY_POWER",
            Opcode::BinaryMultiply => "BINARY_MULTIPLY",
            Opcode::BinaryModulo => "BINARY_MODULO",
            Opcode::BinaryAdd => "BINARY_ADD",
            Opcode::BinarySubtract => "BINARY_SUBTRACT",
            Opcode::BinarySubscr => "BINARY_SUBSCR",
            Opcode::BinaryFloorDivide => "BINARY_FLOOR_DIVIDE",
            Opcode::BinaryTrueDivide => "BINARY_TRUE_DIVIDE",
            Opcode::GetLen => "GET_LEN",
            Opcode::InplaceAdd => "INPLACE_ADD",
            Opcode::InplaceSubtract => "INPLACE_SUBTRACT",
            Opcode::StoreSubscr => "STORE_SUBSCR",
            Opcode::DeleteSubscr => "DELETE_SUBSCR",
            Opcode::PushExcInfo => "PUSH_EXC_INFO",
            Opcode::PopExceptAndReraise => "POP_EXCEPT_AND_RERAISE",
            Opcode::PopExcept => "POP_EXCEPT",
            Opcode::Reraise => "RERAISE",
            Opcode::JumpIfNotExcMatch => "JUMP_IF_NOT_EXC_MATCH",
            Opcode::RaiseVarargs => "RAISE_VARARGS",
            Opcode::LoadAssertionError => "LOAD_ASSERTION_ERROR",
            Opcode::GetAiter => "GET_AITER",
            Opcode::GetAnext => "GET_ANEXT",
            Opcode::BeforeAsyncWith => "BEFORE_ASYNC_WITH",
            Opcode::BeforeWith => "BEFORE_WITH",
            Opcode::EndAsyncFor => "END_ASYNC_FOR",
            Opcode::GetIter => "GET_ITER",
            Opcode::GetYieldFromIter => "GET_YIELD_FROM_ITER",
            Opcode::YieldFrom => "YIELD_FROM",
            Opcode::GetAwaitable => "GET_AWAITABLE",
            Opcode::YieldValue => "YIELD_VALUE",
            Opcode::ForIter => "FOR_ITER",
            Opcode::GenStart => "GEN_START",
            Opcode::PrintExpr => "PRINT_EXPR",
            Opcode::LoadBuildClass => "LOAD_BUILD_CLASS",
            Opcode::ReturnValue => "RETURN_VALUE",
            Opcode::ImportStar => "IMPORT_STAR",
            Opcode::SetupAnnotations => "SETUP_ANNOTATIONS",
            Opcode::StoreName => "STORE_NAME",
            Opcode::DeleteName => "DELETE_NAME",
            Opcode::UnpackSequence => "UNPACK_SEQUENCE",
            Opcode::UnpackEx => "UNPACK_EX",
            Opcode::StoreAttr => "STORE_ATTR",
            Opcode::DeleteAttr => "DELETE_ATTR",
            Opcode::StoreGlobal => "STORE_GLOBAL",
            Opcode::DeleteGlobal => "DELETE_GLOBAL",
            Opcode::RotN => "ROT_N",
            Opcode::LoadConst => "LOAD_CONST",
            Opcode::LoadName => "LOAD_NAME",
            Opcode::LoadAttr => "LOAD_ATTR",
            Opcode::LoadGlobal => "LOAD_GLOBAL",
            Opcode::LoadMethod => "LOAD_METHOD",
            Opcode::BuildTuple => "BUILD_TUPLE",
            Opcode::BuildList => "BUILD_LIST",
            Opcode::BuildSet => "BUILD_SET",
            Opcode::BuildMap => "BUILD_MAP",
            Opcode::BuildSlice => "BUILD_SLICE",
            Opcode::BuildConstKeyMap => "BUILD_CONST_KEY_MAP",
            Opcode::BuildString => "BUILD_STRING",
            Opcode::FormatValue => "FORMAT_VALUE",
            Opcode::ListAppend => "LIST_APPEND",
            Opcode::SetAdd => "SET_ADD",
            Opcode::MapAdd => "MAP_ADD",
            Opcode::ListExtend => "LIST_EXTEND",
            Opcode::SetUpdate => "SET_UPDATE",
            Opcode::DictMerge => "DICT_MERGE",
            Opcode::DictUpdate => "DICT_UPDATE",
            Opcode::CompareOp => "COMPARE_OP",
            Opcode::IsOp => "IS_OP",
            Opcode::ContainsOp => "CONTAINS_OP",
            Opcode::ImportName => "IMPORT_NAME",
            Opcode::ImportFrom => "IMPORT_FROM",
            Opcode::JumpForward => "JUMP_FORWARD",
            Opcode::JumpIfFalseOrPop => "JUMP_IF_FALSE_OR_POP",
            Opcode::JumpIfTrueOrPop => "JUMP_IF_TRUE_OR_POP",
            Opcode::JumpAbsolute => "JUMP_ABSOLUTE",
            Opcode::PopJumpIfFalse => "POP_JUMP_IF_FALSE",
            Opcode::PopJumpIfTrue => "POP_JUMP_IF_TRUE",
            Opcode::LoadFast => "LOAD_FAST",
            Opcode::StoreFast => "STORE_FAST",
            Opcode::DeleteFast => "DELETE_FAST",
            Opcode::MakeCell => "MAKE_CELL",
            Opcode::LoadClosure => "LOAD_CLOSURE",
            Opcode::LoadDeref => "LOAD_DEREF",
            Opcode::StoreDeref => "STORE_DEREF",
            Opcode::DeleteDeref => "DELETE_DEREF",
            Opcode::LoadClassderef => "LOAD_CLASSDEREF",
            Opcode::CallFunction => "CALL_FUNCTION",
            Opcode::MakeFunction => "MAKE_FUNCTION",
            Opcode::CallFunctionKw => "CALL_FUNCTION_KW",
            Opcode::CallFunctionEx => "CALL_FUNCTION_EX",
            Opcode::CallMethod => "CALL_METHOD",
            Opcode::ExtendedArg => "EXTENDED_ARG",
            Opcode::LoadAttrAdaptive => "LOAD_ATTR_ADAPTIVE",
            Opcode::LoadGlobalAdaptive => "LOAD_GLOBAL_ADAPTIVE",
            Opcode::LoadMethodAdaptive => "LOAD_METHOD_ADAPTIVE",
            Opcode::StoreAttrAdaptive => "STORE_ATTR_ADAPTIVE",
            Opcode::CallFunctionAdaptive => "CALL_FUNCTION_ADAPTIVE",
            Opcode::BinarySubscrAdaptive => "BINARY_SUBSCR_ADAPTIVE",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
