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

//! The symbolic virtual machine: walks a tokenized pickle opcode by opcode,
//! maintaining a shadow stack, a mark stack, and a memo table of `Cell`s,
//! without ever executing user code.

use std::collections::HashMap;
use std::rc::Rc;

use tracing::debug;

use crate::cell::{Cell, GlobalArena, Kind, LiteralValue};
use crate::error::{Diagnostics, PickleError};
use crate::opcodes::OpcodeKind;
use crate::token::{Arg, Token, Tokenizer};

/// One opcode's contribution to the walk: what it consumed off the shadow
/// stack (after mark-folding) and what it left behind.
#[derive(Debug, Clone)]
pub struct ParseEntry {
    pub pos: usize,
    pub op: OpcodeKind,
    pub popped: Vec<Cell>,
    pub pushed: Vec<Cell>,
}

/// The full trace of a walk, plus whatever the shadow stack held when the
/// walk ended.
#[derive(Debug, Clone, Default)]
pub struct ParseResult {
    pub entries: Vec<ParseEntry>,
    pub stack: Vec<Cell>,
    pub max_proto: u8,
    pub memo: HashMap<u64, Cell>,
}

impl ParseResult {
    /// The value STOP popped, i.e. the root of the pickled object graph.
    /// `None` if the pickle never reached a STOP.
    pub fn root(&self) -> Option<&Cell> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.op == OpcodeKind::Stop)
            .and_then(|e| e.popped.first())
    }
}

fn memo_index(arg: &Arg) -> u64 {
    match arg {
        Arg::UInt(n) => *n,
        Arg::Str(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

fn literal_kind(op: OpcodeKind) -> Kind {
    use OpcodeKind::*;
    match op {
        Int => Kind::IntOrBool,
        BinInt | BinInt1 | BinInt2 => Kind::Int,
        Long | Long1 | Long4 => Kind::Long,
        String | BinString | ShortBinString | Unicode | ShortBinUnicode | BinUnicode
        | BinUnicode8 => Kind::Unicode,
        BinBytes | ShortBinBytes | BinBytes8 | ByteArray8 => Kind::Bytes,
        None => Kind::None,
        NewTrue | NewFalse => Kind::Bool,
        Float | BinFloat => Kind::Float,
        PersId | BinPersId | Ext1 | Ext2 | Ext4 | NextBuffer | ReadOnlyBuffer => Kind::Opaque,
        _ => unreachable!("literal_kind called on non-literal opcode {op:?}"),
    }
}

fn literal_value(op: OpcodeKind, arg: &Arg) -> LiteralValue {
    use OpcodeKind::*;
    match op {
        NewTrue => LiteralValue::Int(1),
        NewFalse => LiteralValue::Int(0),
        None => LiteralValue::None,
        _ => match arg {
            Arg::None => LiteralValue::None,
            Arg::Int(v) => LiteralValue::Int(*v),
            Arg::UInt(v) => LiteralValue::UInt(*v),
            Arg::Float(v) => LiteralValue::Float(*v),
            Arg::Str(v) => LiteralValue::Str(v.clone()),
            Arg::Bytes(v) => LiteralValue::Bytes(v.clone()),
        },
    }
}

fn as_slice_items(cell: &Cell) -> Vec<Cell> {
    match cell {
        Cell::StackSlice(items) => (**items).clone(),
        other => vec![other.clone()],
    }
}

fn as_list_items(cell: &Cell, diagnostics: &mut Diagnostics) -> Result<Vec<Cell>, PickleError> {
    match cell {
        Cell::List(items) => Ok((**items).clone()),
        other => {
            diagnostics.record(PickleError::StackInconsistent {
                reason: format!("expected a list cell, found {:?}", other.kind()),
            })?;
            Ok(Vec::new())
        }
    }
}

fn as_dict_pairs(
    cell: &Cell,
    diagnostics: &mut Diagnostics,
) -> Result<Vec<(Cell, Cell)>, PickleError> {
    match cell {
        Cell::Dict(pairs) => Ok((**pairs).clone()),
        other => {
            diagnostics.record(PickleError::StackInconsistent {
                reason: format!("expected a dict cell, found {:?}", other.kind()),
            })?;
            Ok(Vec::new())
        }
    }
}

fn as_set_items(cell: &Cell, diagnostics: &mut Diagnostics) -> Result<Vec<Cell>, PickleError> {
    match cell {
        Cell::Set(items) => Ok((**items).clone()),
        other => {
            diagnostics.record(PickleError::StackInconsistent {
                reason: format!("expected a set cell, found {:?}", other.kind()),
            })?;
            Ok(Vec::new())
        }
    }
}

fn pairs_from_slice(
    items: Vec<Cell>,
    diagnostics: &mut Diagnostics,
) -> Result<Vec<(Cell, Cell)>, PickleError> {
    let mut pairs = Vec::with_capacity(items.len() / 2);
    let mut it = items.into_iter();
    loop {
        let Some(k) = it.next() else { break };
        match it.next() {
            Some(v) => pairs.push((k, v)),
            std::option::Option::None => {
                diagnostics.record(PickleError::MissingDictValue { kvlist: vec![k] })?;
                break;
            }
        }
    }
    Ok(pairs)
}

fn global_parts(arg: &Arg) -> (String, String) {
    match arg {
        Arg::Str(s) => match s.split_once(' ') {
            Some((module, name)) => (module.to_string(), name.to_string()),
            std::option::Option::None => (s.clone(), String::new()),
        },
        _ => (String::new(), String::new()),
    }
}

/// Writes `stack`'s top cell into `memo[idx]`, enforcing the two invariants
/// a PUT/BINPUT/LONGBINPUT/MEMOIZE write must respect: the written value
/// can't be a bare `Mark`, and an index can only be written once.
fn memo_write(
    idx: u64,
    stack: &[Cell],
    memo: &mut HashMap<u64, Cell>,
    diagnostics: &mut Diagnostics,
) -> Result<(), PickleError> {
    match stack.last() {
        std::option::Option::None => {
            diagnostics.record(PickleError::StackInconsistent {
                reason: "memoize opcode with an empty stack".into(),
            })?;
        }
        Some(Cell::Mark) => {
            diagnostics.record(PickleError::MemoError {
                memoidx: idx as usize,
                reason: "can't store markobject in memo".into(),
            })?;
        }
        Some(top) => {
            if memo.contains_key(&idx) {
                diagnostics.record(PickleError::MemoError {
                    memoidx: idx as usize,
                    reason: "double memo assignment".into(),
                })?;
            } else {
                memo.insert(idx, top.clone());
            }
        }
    }
    Ok(())
}

fn literal_str(cell: &Cell) -> String {
    match cell {
        Cell::Literal(_, LiteralValue::Str(s)) => s.clone(),
        _ => String::new(),
    }
}

#[allow(clippy::too_many_lines)]
fn dispatch(
    op: OpcodeKind,
    arg: &Arg,
    popped: &[Cell],
    globals: &GlobalArena,
    diagnostics: &mut Diagnostics,
) -> Result<Vec<Cell>, PickleError> {
    use OpcodeKind::*;
    let pushed = match op {
        Proto | Frame => vec![],

        Int | BinInt | BinInt1 | BinInt2 | Long | Long1 | Long4 | String | BinString
        | ShortBinString | BinBytes | ShortBinBytes | BinBytes8 | ByteArray8 | None
        | NewTrue | NewFalse | Unicode | ShortBinUnicode | BinUnicode | BinUnicode8 | Float
        | BinFloat => vec![Cell::Literal(literal_kind(op), literal_value(op, arg))],

        PersId | Ext1 | Ext2 | Ext4 => {
            vec![Cell::Literal(Kind::Opaque, literal_value(op, arg))]
        }
        BinPersId => vec![Cell::Literal(Kind::Opaque, LiteralValue::None)],
        NextBuffer => vec![Cell::Literal(Kind::Opaque, LiteralValue::None)],
        ReadOnlyBuffer => vec![popped[0].clone()],

        EmptyList => vec![Cell::List(Rc::new(Vec::new()))],
        EmptyTuple => vec![Cell::Tuple(Rc::new(Vec::new()))],
        EmptyDict => vec![Cell::Dict(Rc::new(Vec::new()))],
        EmptySet => vec![Cell::Set(Rc::new(Vec::new()))],

        List => {
            let items = as_slice_items(&popped[1]);
            vec![Cell::List(Rc::new(items))]
        }
        Tuple => {
            let items = as_slice_items(&popped[1]);
            vec![Cell::Tuple(Rc::new(items))]
        }
        Tuple1 => vec![Cell::Tuple(Rc::new(vec![popped[0].clone()]))],
        Tuple2 => vec![Cell::Tuple(Rc::new(vec![popped[0].clone(), popped[1].clone()]))],
        Tuple3 => vec![Cell::Tuple(Rc::new(vec![
            popped[0].clone(),
            popped[1].clone(),
            popped[2].clone(),
        ]))],
        FrozenSet => {
            let items = as_slice_items(&popped[1]);
            vec![Cell::FrozenSet(Rc::new(items))]
        }

        Append => {
            let mut items = as_list_items(&popped[0], diagnostics)?;
            items.push(popped[1].clone());
            vec![Cell::List(Rc::new(items))]
        }
        Appends => {
            let mut items = as_list_items(&popped[0], diagnostics)?;
            items.extend(as_slice_items(&popped[2]));
            vec![Cell::List(Rc::new(items))]
        }

        Dict => {
            let pairs = pairs_from_slice(as_slice_items(&popped[1]), diagnostics)?;
            vec![Cell::Dict(Rc::new(pairs))]
        }
        SetItem => {
            let mut pairs = as_dict_pairs(&popped[0], diagnostics)?;
            pairs.push((popped[1].clone(), popped[2].clone()));
            vec![Cell::Dict(Rc::new(pairs))]
        }
        SetItems => {
            let mut pairs = as_dict_pairs(&popped[0], diagnostics)?;
            pairs.extend(pairs_from_slice(as_slice_items(&popped[2]), diagnostics)?);
            vec![Cell::Dict(Rc::new(pairs))]
        }

        AddItems => {
            let mut items = as_set_items(&popped[0], diagnostics)?;
            items.extend(as_slice_items(&popped[2]));
            vec![Cell::Set(Rc::new(items))]
        }

        Pop | PopMark => vec![],
        Dup => vec![popped[0].clone(), popped[0].clone()],

        Global => {
            let (module, name) = global_parts(arg);
            vec![Cell::Global(globals.intern(module, name))]
        }
        StackGlobal => {
            let module = literal_str(&popped[0]);
            let name = literal_str(&popped[1]);
            vec![Cell::Global(globals.intern(module, name))]
        }
        Reduce | NewObj => vec![Cell::Reduce {
            callable: Rc::new(popped[0].clone()),
            args: Rc::new(popped[1].clone()),
        }],
        NewObjEx => vec![Cell::Reduce {
            callable: Rc::new(popped[0].clone()),
            args: Rc::new(Cell::Tuple(Rc::new(vec![popped[1].clone(), popped[2].clone()]))),
        }],
        // BUILD attaches state to obj; symbolically that's the same
        // "callable carries a payload" shape REDUCE/NEWOBJ/INST/OBJ produce,
        // so it's represented the same way: obj in the callable slot, state
        // in the args slot.
        Build => vec![Cell::Reduce {
            callable: Rc::new(popped[0].clone()),
            args: Rc::new(popped[1].clone()),
        }],

        Inst => {
            let (module, name) = global_parts(arg);
            let callable = Cell::Global(globals.intern(module, name));
            let args = as_slice_items(&popped[1]);
            vec![Cell::Reduce {
                callable: Rc::new(callable),
                args: Rc::new(Cell::Tuple(Rc::new(args))),
            }]
        }
        Obj => {
            let mut items = as_slice_items(&popped[1]);
            if items.is_empty() {
                diagnostics.record(PickleError::StackInconsistent {
                    reason: "OBJ with no class on the stack slice".into(),
                })?;
                vec![Cell::none()]
            } else {
                let callable = items.remove(0);
                vec![Cell::Reduce {
                    callable: Rc::new(callable),
                    args: Rc::new(Cell::Tuple(Rc::new(items))),
                }]
            }
        }

        Mark | Stop | Get | BinGet | LongBinGet | Put | BinPut | LongBinPut | Memoize => {
            unreachable!("{op:?} is intercepted in run() before dispatch is ever called")
        }
    };
    Ok(pushed)
}

/// Walks `bytes` opcode by opcode, never executing anything, recording
/// structural diagnostics into `diagnostics` as it goes.
pub fn run(bytes: &[u8], diagnostics: &mut Diagnostics) -> Result<ParseResult, PickleError> {
    let _span = tracing::debug_span!("vm::run", len = bytes.len()).entered();

    let globals = GlobalArena::new();
    let mut stack: Vec<Cell> = Vec::new();
    let mut markstack: Vec<usize> = Vec::new();
    let mut memo: HashMap<u64, Cell> = HashMap::new();
    let mut entries: Vec<ParseEntry> = Vec::new();
    let mut max_proto: u8 = 0;
    let mut stopped = false;

    let mut tokenizer = Tokenizer::new(bytes);
    while let Some(Token { op, arg, pos }) = tokenizer.next() {
        max_proto = max_proto.max(op.min_proto());
        debug!(pos, ?op, "dispatching opcode");

        if op == OpcodeKind::Mark {
            markstack.push(stack.len());
            stack.push(Cell::Mark);
            entries.push(ParseEntry {
                pos,
                op,
                popped: vec![],
                pushed: vec![Cell::Mark],
            });
            continue;
        }

        if matches!(op, OpcodeKind::Put | OpcodeKind::BinPut | OpcodeKind::LongBinPut) {
            let idx = memo_index(&arg);
            memo_write(idx, &stack, &mut memo, diagnostics)?;
            entries.push(ParseEntry {
                pos,
                op,
                popped: vec![],
                pushed: vec![],
            });
            continue;
        }
        if op == OpcodeKind::Memoize {
            let idx = memo.len() as u64;
            memo_write(idx, &stack, &mut memo, diagnostics)?;
            entries.push(ParseEntry {
                pos,
                op,
                popped: vec![],
                pushed: vec![],
            });
            continue;
        }

        if matches!(op, OpcodeKind::Get | OpcodeKind::BinGet | OpcodeKind::LongBinGet) {
            let idx = memo_index(&arg);
            let cell = match memo.get(&idx) {
                Some(c) => c.clone(),
                std::option::Option::None => {
                    diagnostics.record(PickleError::MemoError {
                        memoidx: idx as usize,
                        reason: "no such memo entry".into(),
                    })?;
                    Cell::none()
                }
            };
            stack.push(cell.clone());
            entries.push(ParseEntry {
                pos,
                op,
                popped: vec![],
                pushed: vec![cell],
            });
            continue;
        }

        let arity = op.arity();
        let poppable_mark = op == OpcodeKind::Pop && matches!(stack.last(), Some(Cell::Mark));
        let fold = arity.mark_before || poppable_mark;

        if fold {
            match markstack.pop() {
                Some(mark_idx) => {
                    let tail = stack.split_off(mark_idx + 1);
                    stack.truncate(mark_idx);
                    stack.push(Cell::Mark);
                    stack.push(Cell::StackSlice(Rc::new(tail)));
                }
                std::option::Option::None => {
                    diagnostics.record(PickleError::StackInconsistent {
                        reason: "mark-folding opcode with an empty mark stack".into(),
                    })?;
                }
            }
        }

        let numtopop = if op == OpcodeKind::Pop { 1 } else { arity.before };
        if stack.len() < numtopop {
            diagnostics.record(PickleError::StackUnderflow {
                stackdepth: stack.len(),
                numtopop,
            })?;
            for _ in 0..arity.after {
                stack.push(Cell::none());
            }
            entries.push(ParseEntry {
                pos,
                op,
                popped: vec![],
                pushed: vec![],
            });
            if op == OpcodeKind::Stop {
                stopped = true;
                break;
            }
            continue;
        }

        let popped = stack.split_off(stack.len() - numtopop);

        if op == OpcodeKind::Stop {
            entries.push(ParseEntry {
                pos,
                op,
                popped,
                pushed: vec![],
            });
            stopped = true;
            break;
        }

        let pushed = dispatch(op, &arg, &popped, &globals, diagnostics)?;
        for c in &pushed {
            stack.push(c.clone());
        }
        entries.push(ParseEntry { pos, op, popped, pushed });
    }

    let consumed = tokenizer.consumed();
    if consumed < bytes.len() {
        diagnostics.record(PickleError::PickleTail {
            pickle_length: bytes.len(),
            tail: bytes[consumed..].to_vec(),
        })?;
    }
    if !stopped {
        diagnostics.record(PickleError::LastOpNotStop)?;
    }

    Ok(ParseResult {
        entries,
        stack,
        max_proto,
        memo,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(bytes: &[u8]) -> (ParseResult, Diagnostics) {
        let mut diagnostics = Diagnostics::new(true);
        let result = run(bytes, &mut diagnostics).expect("well-formed pickle");
        (result, diagnostics)
    }

    #[test]
    fn empty_list_pickle_ends_with_empty_stack() {
        let bytes = [0x80, 0x02, 0x5d, 0x2e]; // PROTO 2, EMPTY_LIST, STOP
        let (result, _) = parse(&bytes);
        assert!(result.stack.is_empty());
        assert_eq!(result.max_proto, 2);
        assert!(matches!(result.root(), Some(Cell::List(items)) if items.is_empty()));
    }

    #[test]
    fn a_plain_string_round_trips_through_memo() {
        // PROTO 2, SHORT_BINUNICODE 'hi', MEMOIZE, STOP
        let mut bytes = vec![0x80, 0x02, 0x8c, 2];
        bytes.extend_from_slice(b"hi");
        bytes.push(0x94); // MEMOIZE
        bytes.push(0x2e); // STOP
        let (result, _) = parse(&bytes);
        assert!(result.stack.is_empty());
        match result.root() {
            Some(Cell::Literal(Kind::Unicode, LiteralValue::Str(s))) => assert_eq!(s, "hi"),
            other => panic!("unexpected root: {other:?}"),
        }
    }

    #[test]
    fn stack_underflow_is_detected() {
        let bytes = [0x80, 0x02, 0x61, 0x2e]; // PROTO 2, APPEND (needs 2), STOP
        let mut diagnostics = Diagnostics::new(true);
        let err = run(&bytes, &mut diagnostics).unwrap_err();
        assert!(matches!(err, PickleError::StackUnderflow { .. }));
    }

    #[test]
    fn trailing_bytes_after_stop_are_reported_in_accumulate_mode() {
        let bytes = [0x80, 0x02, 0x4e, 0x2e, 0xff, 0xff]; // PROTO 2, NONE, STOP, garbage
        let mut diagnostics = Diagnostics::new(false);
        let result = run(&bytes, &mut diagnostics).unwrap();
        assert!(result.stack.is_empty());
        let tail = diagnostics.issues().iter().find_map(|e| match e {
            PickleError::PickleTail { tail, .. } => Some(tail.clone()),
            _ => None,
        });
        assert_eq!(tail, Some(vec![0xff, 0xff]));
    }

    #[test]
    fn a_bare_stop_records_exactly_one_underflow_and_no_extra_issue() {
        // STOP alone: underflow, and STOP *is* the final opcode seen, so no
        // separate "does not end with a STOP" issue should also appear.
        let bytes = [0x2e];
        let mut diagnostics = Diagnostics::new(false);
        run(&bytes, &mut diagnostics).unwrap();
        assert_eq!(diagnostics.issues().len(), 1);
        assert!(matches!(diagnostics.issues()[0], PickleError::StackUnderflow { .. }));
    }

    #[test]
    fn pop_then_stop_on_an_empty_stack_records_two_underflows_only() {
        // POP needs 1, has 0; then STOP needs 1, has 0. No LastOpNotStop.
        let bytes = [0x30, 0x2e]; // POP, STOP
        let mut diagnostics = Diagnostics::new(false);
        run(&bytes, &mut diagnostics).unwrap();
        assert_eq!(diagnostics.issues().len(), 2);
        assert!(diagnostics
            .issues()
            .iter()
            .all(|e| matches!(e, PickleError::StackUnderflow { .. })));
    }

    #[test]
    fn memoizing_a_bare_mark_is_flagged() {
        // MARK, BINPUT 0, STOP
        let bytes = [0x28, 0x71, 0, 0x2e];
        let mut diagnostics = Diagnostics::new(false);
        run(&bytes, &mut diagnostics).unwrap();
        assert!(diagnostics.issues().iter().any(
            |e| matches!(e, PickleError::MemoError { reason, .. } if reason.contains("markobject"))
        ));
    }

    #[test]
    fn writing_the_same_memo_index_twice_is_flagged() {
        // EMPTY_LIST, BINPUT 0, EMPTY_DICT, BINPUT 0, STOP
        let bytes = [0x80, 0x02, 0x5d, 0x71, 0, 0x7d, 0x71, 0, 0x2e];
        let mut diagnostics = Diagnostics::new(false);
        run(&bytes, &mut diagnostics).unwrap();
        assert!(diagnostics.issues().iter().any(
            |e| matches!(e, PickleError::MemoError { reason, .. } if reason.contains("double"))
        ));
    }

    #[test]
    fn dict_with_an_odd_number_of_items_reports_the_leftover_key() {
        // PROTO 2, MARK, BININT1 1, DICT, STOP -- one key, no value
        let bytes = [0x80, 0x02, 0x28, 0x4b, 1, 0x64, 0x2e];
        let mut diagnostics = Diagnostics::new(false);
        run(&bytes, &mut diagnostics).unwrap();
        let kvlist = diagnostics.issues().iter().find_map(|e| match e {
            PickleError::MissingDictValue { kvlist } => Some(kvlist.clone()),
            _ => None,
        });
        match kvlist.as_deref() {
            Some([Cell::Literal(Kind::Int, LiteralValue::UInt(1))]) => {}
            other => panic!("unexpected kvlist: {other:?}"),
        }
    }

    #[test]
    fn build_attaches_state_to_obj_as_a_reduce_like_wrapper() {
        // PROTO 2, GLOBAL "builtins str", EMPTY_TUPLE, REDUCE, EMPTY_DICT, BUILD, STOP
        let mut bytes = vec![0x80, 0x02, 0x63];
        bytes.extend_from_slice(b"builtins\n");
        bytes.extend_from_slice(b"str\n");
        bytes.push(0x29); // EMPTY_TUPLE
        bytes.push(0x52); // REDUCE
        bytes.push(0x7d); // EMPTY_DICT
        bytes.push(0x62); // BUILD
        bytes.push(0x2e); // STOP
        let (result, _) = parse(&bytes);
        match result.root() {
            Some(Cell::Reduce { callable, args }) => {
                assert!(matches!(**callable, Cell::Reduce { .. }));
                assert!(matches!(**args, Cell::Dict(ref pairs) if pairs.is_empty()));
            }
            other => panic!("expected a Reduce-like wrapper, got {other:?}"),
        }
    }

    #[test]
    fn list_append_rebuilds_rather_than_mutates() {
        // PROTO 2, EMPTY_LIST, MEMOIZE(0), BININT1 1, APPEND, STOP
        let bytes = [0x80, 0x02, 0x5d, 0x94, 0x4b, 1, 0x61, 0x2e];
        let (result, _) = parse(&bytes);
        let appended = result.entries.iter().find(|e| e.op == OpcodeKind::Append).unwrap();
        match &appended.pushed[0] {
            Cell::List(items) => assert_eq!(items.len(), 1),
            other => panic!("expected list, got {other:?}"),
        }
    }
}
