// SPDX-License-Identifier: Apache-2.0
//
// Copyright 2025 Cisco Systems, Inc. and its affiliates
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Pickle opcodes and the static metadata the symbolic VM needs about each
//! of them: which byte identifies it, which protocol introduced it, and its
//! declared stack arity.

/// One pickle opcode, named the way `pickletools.py` names them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum OpcodeKind {
    Int,
    BinInt,
    BinInt1,
    BinInt2,
    Long,
    Long1,
    Long4,
    String,
    BinString,
    ShortBinString,
    BinBytes,
    ShortBinBytes,
    BinBytes8,
    ByteArray8,
    NextBuffer,
    ReadOnlyBuffer,
    None,
    NewTrue,
    NewFalse,
    Unicode,
    ShortBinUnicode,
    BinUnicode,
    BinUnicode8,
    Float,
    BinFloat,
    EmptyList,
    Append,
    Appends,
    List,
    EmptyTuple,
    Tuple,
    Tuple1,
    Tuple2,
    Tuple3,
    EmptyDict,
    Dict,
    SetItem,
    SetItems,
    EmptySet,
    AddItems,
    FrozenSet,
    Pop,
    Dup,
    Mark,
    PopMark,
    Get,
    BinGet,
    LongBinGet,
    Put,
    BinPut,
    LongBinPut,
    Memoize,
    Ext1,
    Ext2,
    Ext4,
    Global,
    StackGlobal,
    Reduce,
    Build,
    Inst,
    Obj,
    NewObj,
    NewObjEx,
    Proto,
    Stop,
    Frame,
    PersId,
    BinPersId,
}

/// Declared stack arity of an opcode, counted *after* mark-folding has
/// already collapsed "everything since the last MARK" into a single
/// `StackSlice` cell. An opcode like LIST, whose real pickle semantics pop a
/// variable number of items, therefore has a fixed `before` of 2 here: the
/// folded `Mark` cell and the folded `StackSlice` cell.
#[derive(Debug, Clone, Copy)]
pub struct Arity {
    pub before: usize,
    pub mark_before: bool,
    pub after: usize,
}

impl Arity {
    const fn new(before: usize, mark_before: bool, after: usize) -> Self {
        Arity {
            before,
            mark_before,
            after,
        }
    }
}

impl OpcodeKind {
    pub fn as_u8(self) -> u8 {
        use OpcodeKind::*;
        match self {
            Int => 0x49,
            BinInt => 0x4a,
            BinInt1 => 0x4b,
            BinInt2 => 0x4d,
            Long => 0x4c,
            Long1 => 0x8a,
            Long4 => 0x8b,
            String => 0x53,
            BinString => 0x54,
            ShortBinString => 0x55,
            BinBytes => 0x42,
            ShortBinBytes => 0x43,
            BinBytes8 => 0x8e,
            ByteArray8 => 0x96,
            NextBuffer => 0x97,
            ReadOnlyBuffer => 0x98,
            None => 0x4e,
            NewTrue => 0x88,
            NewFalse => 0x89,
            Unicode => 0x56,
            ShortBinUnicode => 0x8c,
            BinUnicode => 0x58,
            BinUnicode8 => 0x8d,
            Float => 0x46,
            BinFloat => 0x47,
            EmptyList => 0x5d,
            Append => 0x61,
            Appends => 0x65,
            List => 0x6c,
            EmptyTuple => 0x29,
            Tuple => 0x74,
            Tuple1 => 0x85,
            Tuple2 => 0x86,
            Tuple3 => 0x87,
            EmptyDict => 0x7d,
            Dict => 0x64,
            SetItem => 0x73,
            SetItems => 0x75,
            EmptySet => 0x8f,
            AddItems => 0x90,
            FrozenSet => 0x91,
            Pop => 0x30,
            Dup => 0x32,
            Mark => 0x28,
            PopMark => 0x31,
            Get => 0x67,
            BinGet => 0x68,
            LongBinGet => 0x6a,
            Put => 0x70,
            BinPut => 0x71,
            LongBinPut => 0x72,
            Memoize => 0x94,
            Ext1 => 0x82,
            Ext2 => 0x83,
            Ext4 => 0x84,
            Global => 0x63,
            StackGlobal => 0x93,
            Reduce => 0x52,
            Build => 0x62,
            Inst => 0x69,
            Obj => 0x6f,
            NewObj => 0x81,
            NewObjEx => 0x92,
            Proto => 0x80,
            Stop => 0x2e,
            Frame => 0x95,
            PersId => 0x50,
            BinPersId => 0x51,
        }
    }

    pub fn from_u8(byte: u8) -> Option<Self> {
        use OpcodeKind::*;
        Some(match byte {
            0x49 => Int,
            0x4a => BinInt,
            0x4b => BinInt1,
            0x4d => BinInt2,
            0x4c => Long,
            0x8a => Long1,
            0x8b => Long4,
            0x53 => String,
            0x54 => BinString,
            0x55 => ShortBinString,
            0x42 => BinBytes,
            0x43 => ShortBinBytes,
            0x8e => BinBytes8,
            0x96 => ByteArray8,
            0x97 => NextBuffer,
            0x98 => ReadOnlyBuffer,
            0x4e => None,
            0x88 => NewTrue,
            0x89 => NewFalse,
            0x56 => Unicode,
            0x8c => ShortBinUnicode,
            0x58 => BinUnicode,
            0x8d => BinUnicode8,
            0x46 => Float,
            0x47 => BinFloat,
            0x5d => EmptyList,
            0x61 => Append,
            0x65 => Appends,
            0x6c => List,
            0x29 => EmptyTuple,
            0x74 => Tuple,
            0x85 => Tuple1,
            0x86 => Tuple2,
            0x87 => Tuple3,
            0x7d => EmptyDict,
            0x64 => Dict,
            0x73 => SetItem,
            0x75 => SetItems,
            0x8f => EmptySet,
            0x90 => AddItems,
            0x91 => FrozenSet,
            0x30 => Pop,
            0x32 => Dup,
            0x28 => Mark,
            0x31 => PopMark,
            0x67 => Get,
            0x68 => BinGet,
            0x6a => LongBinGet,
            0x70 => Put,
            0x71 => BinPut,
            0x72 => LongBinPut,
            0x94 => Memoize,
            0x82 => Ext1,
            0x83 => Ext2,
            0x84 => Ext4,
            0x63 => Global,
            0x93 => StackGlobal,
            0x52 => Reduce,
            0x62 => Build,
            0x69 => Inst,
            0x6f => Obj,
            0x81 => NewObj,
            0x92 => NewObjEx,
            0x80 => Proto,
            0x2e => Stop,
            0x95 => Frame,
            0x50 => PersId,
            0x51 => BinPersId,
            _ => return None,
        })
    }

    /// The lowest pickle protocol version this opcode is legal in. Drives
    /// the running `max_proto` tracked by the VM.
    pub fn min_proto(self) -> u8 {
        use OpcodeKind::*;
        match self {
            Int | Long | String | None | Unicode | Float | Append | List | Tuple | Dict
            | SetItem | Pop | Dup | Mark | Get | Put | Global | Reduce | Build | Inst | Obj
            | Stop | PersId => 0,
            BinInt | BinInt1 | BinInt2 | BinString | ShortBinString | BinUnicode | BinFloat
            | EmptyList | Appends | EmptyTuple | EmptyDict | SetItems | PopMark | BinGet
            | LongBinGet | BinPut | LongBinPut | BinPersId => 1,
            Long1 | Long4 | NewTrue | NewFalse | Tuple1 | Tuple2 | Tuple3 | Ext1 | Ext2 | Ext4
            | NewObj | Proto => 2,
            BinBytes | ShortBinBytes => 3,
            BinBytes8 | ShortBinUnicode | BinUnicode8 | EmptySet | AddItems | FrozenSet
            | Memoize | StackGlobal | NewObjEx | Frame => 4,
            ByteArray8 | NextBuffer | ReadOnlyBuffer => 5,
        }
    }

    /// Declared stack arity, with MEMOIZE/PUT/BINPUT/LONG_BINPUT already
    /// collapsed to their true net effect of zero (they read the stack top
    /// without popping it).
    pub fn arity(self) -> Arity {
        use OpcodeKind::*;
        match self {
            Proto | Frame => Arity::new(0, false, 0),
            Stop => Arity::new(1, false, 0),

            Int | BinInt | BinInt1 | BinInt2 | Long | Long1 | Long4 | String | BinString
            | ShortBinString | BinBytes | ShortBinBytes | BinBytes8 | ByteArray8 | None
            | NewTrue | NewFalse | Unicode | ShortBinUnicode | BinUnicode | BinUnicode8
            | Float | BinFloat | EmptyList | EmptyTuple | EmptyDict | EmptySet | Mark => {
                Arity::new(0, false, 1)
            }

            List | Dict | FrozenSet | Tuple => Arity::new(2, true, 1),
            Appends | SetItems | AddItems => Arity::new(3, true, 1),
            PopMark => Arity::new(2, true, 0),

            Tuple1 => Arity::new(1, false, 1),
            Tuple2 => Arity::new(2, false, 1),
            Tuple3 => Arity::new(3, false, 1),

            Append => Arity::new(2, false, 1),
            SetItem => Arity::new(3, false, 1),

            Pop => Arity::new(1, false, 0),
            Dup => Arity::new(1, false, 2),

            Get | BinGet | LongBinGet => Arity::new(0, false, 1),
            Put | BinPut | LongBinPut | Memoize => Arity::new(0, false, 0),

            Ext1 | Ext2 | Ext4 | PersId => Arity::new(0, false, 1),
            BinPersId => Arity::new(1, false, 1),

            Global => Arity::new(0, false, 1),
            StackGlobal => Arity::new(2, false, 1),
            Reduce | NewObj | Build => Arity::new(2, false, 1),
            NewObjEx => Arity::new(3, false, 1),
            Inst | Obj => Arity::new(2, true, 1),

            NextBuffer => Arity::new(0, false, 1),
            ReadOnlyBuffer => Arity::new(1, false, 1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: &[OpcodeKind] = &[
        OpcodeKind::Int,
        OpcodeKind::BinInt,
        OpcodeKind::BinInt1,
        OpcodeKind::BinInt2,
        OpcodeKind::Long,
        OpcodeKind::Long1,
        OpcodeKind::Long4,
        OpcodeKind::String,
        OpcodeKind::BinString,
        OpcodeKind::ShortBinString,
        OpcodeKind::BinBytes,
        OpcodeKind::ShortBinBytes,
        OpcodeKind::BinBytes8,
        OpcodeKind::ByteArray8,
        OpcodeKind::NextBuffer,
        OpcodeKind::ReadOnlyBuffer,
        OpcodeKind::None,
        OpcodeKind::NewTrue,
        OpcodeKind::NewFalse,
        OpcodeKind::Unicode,
        OpcodeKind::ShortBinUnicode,
        OpcodeKind::BinUnicode,
        OpcodeKind::BinUnicode8,
        OpcodeKind::Float,
        OpcodeKind::BinFloat,
        OpcodeKind::EmptyList,
        OpcodeKind::Append,
        OpcodeKind::Appends,
        OpcodeKind::List,
        OpcodeKind::EmptyTuple,
        OpcodeKind::Tuple,
        OpcodeKind::Tuple1,
        OpcodeKind::Tuple2,
        OpcodeKind::Tuple3,
        OpcodeKind::EmptyDict,
        OpcodeKind::Dict,
        OpcodeKind::SetItem,
        OpcodeKind::SetItems,
        OpcodeKind::EmptySet,
        OpcodeKind::AddItems,
        OpcodeKind::FrozenSet,
        OpcodeKind::Pop,
        OpcodeKind::Dup,
        OpcodeKind::Mark,
        OpcodeKind::PopMark,
        OpcodeKind::Get,
        OpcodeKind::BinGet,
        OpcodeKind::LongBinGet,
        OpcodeKind::Put,
        OpcodeKind::BinPut,
        OpcodeKind::LongBinPut,
        OpcodeKind::Memoize,
        OpcodeKind::Ext1,
        OpcodeKind::Ext2,
        OpcodeKind::Ext4,
        OpcodeKind::Global,
        OpcodeKind::StackGlobal,
        OpcodeKind::Reduce,
        OpcodeKind::Build,
        OpcodeKind::Inst,
        OpcodeKind::Obj,
        OpcodeKind::NewObj,
        OpcodeKind::NewObjEx,
        OpcodeKind::Proto,
        OpcodeKind::Stop,
        OpcodeKind::Frame,
        OpcodeKind::PersId,
        OpcodeKind::BinPersId,
    ];

    #[test]
    fn roundtrips_every_byte() {
        for &op in ALL {
            assert_eq!(OpcodeKind::from_u8(op.as_u8()), Some(op));
        }
    }

    #[test]
    fn memoize_and_put_family_have_no_net_stack_effect() {
        for op in [
            OpcodeKind::Memoize,
            OpcodeKind::Put,
            OpcodeKind::BinPut,
            OpcodeKind::LongBinPut,
        ] {
            let a = op.arity();
            assert_eq!(a.before, 0);
            assert_eq!(a.after, 0);
        }
    }

    #[test]
    fn stop_pops_exactly_the_final_value() {
        let a = OpcodeKind::Stop.arity();
        assert_eq!(a.before, 1);
        assert_eq!(a.after, 0);
    }
}
