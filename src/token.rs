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

//! Decodes a buffered byte slice into a stream of `(opcode, argument,
//! position)` tokens without executing any of it.

use crate::opcodes::OpcodeKind;

/// A decoded opcode argument. The wire representation (ASCII decimal,
/// fixed-width little/big-endian integer, length-prefixed bytes) is
/// collapsed here; only the logical value downstream consumers need
/// survives.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    None,
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
}

/// One decoded instruction: which opcode, what argument it carries (if
/// any), and the byte offset at which it began.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub op: OpcodeKind,
    pub arg: Arg,
    pub pos: usize,
}

/// Streams `Token`s out of a buffered pickle payload.
///
/// Mirrors `pickletools.genops`'s tolerance for truncated input: rather than
/// raising an I/O-style error when an opcode's argument runs past the end of
/// the buffer, the tokenizer simply stops yielding tokens. Whatever bytes
/// remain unconsumed are left for the VM's tail check to report.
pub struct Tokenizer<'a> {
    bytes: &'a [u8],
    pos: usize,
    done: bool,
}

impl<'a> Tokenizer<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Tokenizer {
            bytes,
            pos: 0,
            done: false,
        }
    }

    /// Byte offset immediately after the last token yielded (or 0 if none
    /// were). Used by the VM to report how many trailing bytes were never
    /// consumed.
    pub fn consumed(&self) -> usize {
        self.pos
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.pos + n > self.bytes.len() {
            return None;
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Some(slice)
    }

    fn take_line(&mut self) -> Option<&'a [u8]> {
        let rest = &self.bytes[self.pos..];
        let nl = rest.iter().position(|&b| b == b'\n')?;
        let line = &rest[..nl];
        self.pos += nl + 1;
        Some(line)
    }

    fn u8(&mut self) -> Option<u64> {
        self.take(1).map(|b| b[0] as u64)
    }

    fn u16_le(&mut self) -> Option<u64> {
        self.take(2)
            .map(|b| u16::from_le_bytes([b[0], b[1]]) as u64)
    }

    fn u32_le(&mut self) -> Option<u64> {
        self.take(4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as u64)
    }

    fn i32_le(&mut self) -> Option<i64> {
        self.take(4)
            .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as i64)
    }

    fn u64_le(&mut self) -> Option<u64> {
        self.take(8)
            .map(|b| u64::from_le_bytes(b.try_into().unwrap()))
    }

    fn f64_be(&mut self) -> Option<f64> {
        self.take(8)
            .map(|b| f64::from_be_bytes(b.try_into().unwrap()))
    }

    fn line_str(&mut self) -> Option<String> {
        self.take_line()
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    fn sized_bytes(&mut self, len: u64) -> Option<Vec<u8>> {
        self.take(len as usize).map(|b| b.to_vec())
    }

    fn sized_str(&mut self, len: u64) -> Option<String> {
        self.sized_bytes(len)
            .map(|b| String::from_utf8_lossy(&b).into_owned())
    }

    fn decode(&mut self, op: OpcodeKind) -> Option<Arg> {
        use OpcodeKind::*;
        Some(match op {
            Proto => Arg::UInt(self.u8()?),
            Frame => Arg::UInt(self.u64_le()?),
            Stop | Mark | PopMark | Pop | Dup | EmptyList | EmptyTuple | EmptyDict | EmptySet
            | Append | Appends | List | Tuple | Tuple1 | Tuple2 | Tuple3 | Dict | SetItem
            | SetItems | AddItems | FrozenSet | Memoize | StackGlobal | Reduce | Build | Obj
            | NewObj | NewObjEx | BinPersId => Arg::None,
            None => Arg::None,
            NewTrue => Arg::Int(1),
            NewFalse => Arg::Int(0),
            Int => Arg::Str(self.line_str()?),
            BinInt => Arg::Int(self.i32_le()?),
            BinInt1 => Arg::UInt(self.u8()?),
            BinInt2 => Arg::UInt(self.u16_le()?),
            Long => Arg::Str(self.line_str()?),
            Long1 => {
                let n = self.u8()?;
                Arg::Bytes(self.sized_bytes(n)?)
            }
            Long4 => {
                let n = self.u32_le()?;
                Arg::Bytes(self.sized_bytes(n)?)
            }
            String => Arg::Str(self.line_str()?),
            BinString => {
                let n = self.u32_le()?;
                Arg::Str(self.sized_str(n)?)
            }
            ShortBinString => {
                let n = self.u8()?;
                Arg::Str(self.sized_str(n)?)
            }
            BinBytes => {
                let n = self.u32_le()?;
                Arg::Bytes(self.sized_bytes(n)?)
            }
            ShortBinBytes => {
                let n = self.u8()?;
                Arg::Bytes(self.sized_bytes(n)?)
            }
            BinBytes8 => {
                let n = self.u64_le()?;
                Arg::Bytes(self.sized_bytes(n)?)
            }
            ByteArray8 => {
                let n = self.u64_le()?;
                Arg::Bytes(self.sized_bytes(n)?)
            }
            NextBuffer | ReadOnlyBuffer => Arg::None,
            Unicode => Arg::Str(self.line_str()?),
            ShortBinUnicode => {
                let n = self.u8()?;
                Arg::Str(self.sized_str(n)?)
            }
            BinUnicode => {
                let n = self.u32_le()?;
                Arg::Str(self.sized_str(n)?)
            }
            BinUnicode8 => {
                let n = self.u64_le()?;
                Arg::Str(self.sized_str(n)?)
            }
            Float => Arg::Str(self.line_str()?),
            BinFloat => Arg::Float(self.f64_be()?),
            Get => Arg::Str(self.line_str()?),
            BinGet => Arg::UInt(self.u8()?),
            LongBinGet => Arg::UInt(self.u32_le()?),
            Put => Arg::Str(self.line_str()?),
            BinPut => Arg::UInt(self.u8()?),
            LongBinPut => Arg::UInt(self.u32_le()?),
            Ext1 => Arg::UInt(self.u8()?),
            Ext2 => Arg::UInt(self.u16_le()?),
            Ext4 => Arg::UInt(self.u32_le()?),
            Global => {
                let module = self.line_str()?;
                let name = self.line_str()?;
                Arg::Str(format!("{} {}", module, name))
            }
            Inst => {
                let module = self.line_str()?;
                let name = self.line_str()?;
                Arg::Str(format!("{} {}", module, name))
            }
            PersId => Arg::Str(self.line_str()?),
        })
    }
}

impl<'a> Iterator for Tokenizer<'a> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        if self.done {
            return None;
        }
        let start = self.pos;
        let byte = *self.bytes.get(self.pos)?;
        let Some(op) = OpcodeKind::from_u8(byte) else {
            self.done = true;
            return std::option::Option::None;
        };
        self.pos += 1;
        let Some(arg) = self.decode(op) else {
            // Truncated mid-argument: roll back to the opcode byte itself
            // so it's reported as unconsumed tail, and stop.
            self.pos = start;
            self.done = true;
            return std::option::Option::None;
        };
        if op == OpcodeKind::Stop {
            self.done = true;
        }
        Some(Token {
            op,
            arg,
            pos: start,
        })
    }
}
