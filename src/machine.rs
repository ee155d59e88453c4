use fxhash::FxBuildHasher;
use indexmap::IndexMap;
use tracing::trace;

use std::ops::{Index, IndexMut};

use crate::allocator::MAX_REGS;
use crate::and_stack::AndStack;
use crate::ast::RegType;
use crate::atom_table::{Functor, FunctorTable};
use crate::heap::{Addr, Heap, HeapCellValue, Ref, Registers};
use crate::instructions::*;
use crate::machine_errors::MachineError;
use crate::or_stack::OrStack;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum MachineMode {
    Read,
    Write,
}

/// The per-query scratch state: heap, registers, trail, both stacks and the
/// control registers. Everything here is owned by the machine instance;
/// separate `Machine` values never share state.
pub(crate) struct MachineState {
    pub(crate) s: usize,
    pub(crate) p: CodePtr,
    pub(crate) b: usize,
    pub(crate) b0: usize,
    pub(crate) e: usize,
    pub(crate) num_of_args: usize,
    pub(crate) cp: CodePtr,
    pub(crate) fail: bool,
    pub(crate) heap: Heap,
    pub(crate) mode: MachineMode,
    pub(crate) and_stack: AndStack,
    pub(crate) or_stack: OrStack,
    pub(crate) registers: Registers,
    pub(crate) trail: Vec<Ref>,
    pub(crate) hb: usize,
    pub(crate) call_count: u64,
}

impl Index<RegType> for MachineState {
    type Output = Addr;

    fn index(&self, reg: RegType) -> &Self::Output {
        match reg {
            RegType::Temp(temp) => &self.registers[temp],
            RegType::Perm(perm) => {
                let e = self.e;
                &self.and_stack[e][perm]
            }
        }
    }
}

impl IndexMut<RegType> for MachineState {
    fn index_mut(&mut self, reg: RegType) -> &mut Self::Output {
        match reg {
            RegType::Temp(temp) => &mut self.registers[temp],
            RegType::Perm(perm) => {
                let e = self.e;
                &mut self.and_stack[e][perm]
            }
        }
    }
}

impl MachineState {
    pub(crate) fn new() -> Self {
        MachineState {
            s: 0,
            p: CodePtr::default(),
            b: 0,
            b0: 0,
            e: 0,
            num_of_args: 0,
            cp: CodePtr::default(),
            fail: false,
            heap: Heap::with_capacity(256),
            mode: MachineMode::Write,
            and_stack: AndStack::new(),
            or_stack: OrStack::new(),
            registers: vec![Addr::HeapCell(0); MAX_REGS + 1], // registers[0] is never used.
            trail: Vec::new(),
            hb: 0,
            call_count: 0,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.s = 0;
        self.p = CodePtr::default();
        self.b = 0;
        self.b0 = 0;
        self.e = 0;
        self.num_of_args = 0;
        self.cp = CodePtr::default();
        self.fail = false;
        self.heap.clear();
        self.mode = MachineMode::Write;
        self.and_stack.clear();
        self.or_stack.clear();
        self.registers = vec![Addr::HeapCell(0); MAX_REGS + 1];
        self.trail.clear();
        self.hb = 0;
        self.call_count = 0;
    }

    fn next_global_index(&self) -> usize {
        let and_gi = if self.and_stack.is_empty() {
            0
        } else {
            self.and_stack[self.e].global_index
        };

        let or_gi = if self.b > 0 {
            self.or_stack[self.b - 1].global_index
        } else {
            0
        };

        and_gi.max(or_gi) + 1
    }

    pub(crate) fn store(&self, a: Addr) -> Addr {
        match a {
            Addr::HeapCell(r) => self.heap[r].as_addr(r),
            Addr::StackCell(fr, sc) => self.and_stack[fr][sc],
            addr => addr,
        }
    }

    pub(crate) fn deref(&self, mut a: Addr) -> Addr {
        loop {
            let value = self.store(a);

            if value.is_ref() && value != a {
                a = value;
                continue;
            }

            return a;
        }
    }

    fn is_unbound(&self, r: Ref) -> bool {
        match r {
            Ref::HeapCell(h) => self.heap[h] == HeapCellValue::Ref(Ref::HeapCell(h)),
            Ref::StackCell(fr, sc) => self.and_stack[fr][sc] == Addr::StackCell(fr, sc),
        }
    }

    fn write_ref(&mut self, r: Ref, addr: Addr) -> Result<(), MachineError> {
        if !self.is_unbound(r) {
            let h = match r {
                Ref::HeapCell(h) => h,
                Ref::StackCell(fr, _) => fr,
            };

            return Err(MachineError::BindToBound(h));
        }

        match r {
            Ref::HeapCell(h) => self.heap[h] = HeapCellValue::from(addr),
            Ref::StackCell(fr, sc) => self.and_stack[fr][sc] = addr,
        }

        Ok(())
    }

    // younger = created later. Stack cells bind towards the heap; heap and
    // stack cells among themselves bind the higher address at the lower.
    fn younger(r1: Ref, r2: Ref) -> bool {
        match (r1, r2) {
            (Ref::HeapCell(h1), Ref::HeapCell(h2)) => h1 > h2,
            (Ref::StackCell(..), Ref::HeapCell(_)) => true,
            (Ref::HeapCell(_), Ref::StackCell(..)) => false,
            (Ref::StackCell(fr1, sc1), Ref::StackCell(fr2, sc2)) => (fr1, sc1) > (fr2, sc2),
        }
    }

    /// Bind the unbound cell `r1`. When the target is itself an unbound
    /// reference, the younger of the two cells is pointed at the older, so
    /// no binding ever points into storage that backtracking discards
    /// first.
    fn bind(&mut self, r1: Ref, a2: Addr) -> Result<(), MachineError> {
        let t2 = self.store(a2);

        match t2.as_var() {
            None => {
                self.write_ref(r1, t2)?;
                self.trail(r1);
            }
            Some(r2) if r1 == r2 => {}
            Some(r2) => {
                if Self::younger(r1, r2) {
                    self.write_ref(r1, r2.as_addr())?;
                    self.trail(r1);
                } else {
                    self.write_ref(r2, r1.as_addr())?;
                    self.trail(r2);
                }
            }
        }

        Ok(())
    }

    /// Iterative structural unification over an explicit pair stack.
    pub(crate) fn unify(&mut self, a1: Addr, a2: Addr) -> Result<(), MachineError> {
        let mut pdl = vec![a1, a2];

        loop {
            let (t1, t2) = match (pdl.pop(), pdl.pop()) {
                (Some(t1), Some(t2)) if !self.fail => (t1, t2),
                _ => break,
            };

            let d1 = self.deref(t1);
            let d2 = self.deref(t2);

            if d1 == d2 {
                continue;
            }

            match (self.store(d1), self.store(d2)) {
                (Addr::HeapCell(hc), _) => self.bind(Ref::HeapCell(hc), d2)?,
                (_, Addr::HeapCell(hc)) => self.bind(Ref::HeapCell(hc), d1)?,
                (Addr::StackCell(fr, sc), _) => self.bind(Ref::StackCell(fr, sc), d2)?,
                (_, Addr::StackCell(fr, sc)) => self.bind(Ref::StackCell(fr, sc), d1)?,
                (Addr::Con(c1), Addr::Con(c2)) => {
                    if c1 != c2 {
                        self.fail = true;
                    }
                }
                (Addr::Str(s1), Addr::Str(s2)) => {
                    let r1 = self.heap[s1];
                    let r2 = self.heap[s2];

                    if let HeapCellValue::NamedStr(n1, f1) = r1 {
                        if let HeapCellValue::NamedStr(n2, f2) = r2 {
                            if n1 == n2 && f1 == f2 {
                                for i in 1..n1 + 1 {
                                    pdl.push(Addr::HeapCell(s1 + i));
                                    pdl.push(Addr::HeapCell(s2 + i));
                                }

                                continue;
                            }
                        }
                    }

                    self.fail = true;
                }
                _ => self.fail = true,
            }
        }

        Ok(())
    }

    fn trail(&mut self, r: Ref) {
        match r {
            Ref::HeapCell(hc) => {
                if hc < self.hb {
                    self.trail.push(r);
                }
            }
            Ref::StackCell(fr, _) => {
                let fr_gi = self.and_stack[fr].global_index;
                let b_gi = if self.b > 0 {
                    self.or_stack[self.b - 1].global_index
                } else {
                    0
                };

                if fr_gi < b_gi {
                    self.trail.push(r);
                }
            }
        }
    }

    fn unwind_trail(&mut self, old_tr: usize) {
        for i in old_tr..self.trail.len() {
            match self.trail[i] {
                Ref::HeapCell(r) => self.heap[r] = HeapCellValue::Ref(Ref::HeapCell(r)),
                Ref::StackCell(fr, sc) => self.and_stack[fr][sc] = Addr::StackCell(fr, sc),
            }
        }

        self.trail.truncate(old_tr);
    }

    // after a cut, drop trail entries that the surviving choice point no
    // longer needs undone.
    fn tidy_trail(&mut self) {
        if self.b == 0 {
            return;
        }

        let b = self.b - 1;
        let h = self.or_stack[b].h;
        let b_gi = self.or_stack[b].global_index;
        let mut i = self.or_stack[b].tr;

        while i < self.trail.len() {
            let keep = match self.trail[i] {
                Ref::HeapCell(hc) => hc < h,
                Ref::StackCell(fr, _) => self.and_stack[fr].global_index < b_gi,
            };

            if keep {
                i += 1;
            } else {
                self.trail.swap_remove(i);
            }
        }
    }

    pub(crate) fn execute_query_instr(&mut self, instr: QueryInstruction) {
        match instr {
            QueryInstruction::PutConstant(_, c, reg) => {
                self[reg] = Addr::Con(c);
            }
            QueryInstruction::PutStructure(_, f, arity, reg) => {
                let h = self.heap.len();

                self.heap.push(HeapCellValue::Str(h + 1));
                self.heap.push(HeapCellValue::NamedStr(arity, f));

                self[reg] = Addr::Str(h + 1);
            }
            QueryInstruction::PutValue(norm, arg) => {
                self.registers[arg] = self[norm];
            }
            QueryInstruction::PutVariable(norm, arg) => {
                let h = self.heap.len();

                self.heap.push(HeapCellValue::Ref(Ref::HeapCell(h)));
                self[norm] = Addr::HeapCell(h);
                self.registers[arg] = Addr::HeapCell(h);
            }
            QueryInstruction::SetConstant(c) => {
                self.heap.push(HeapCellValue::Con(c));
            }
            QueryInstruction::SetVariable(reg) => {
                let h = self.heap.len();

                self.heap.push(HeapCellValue::Ref(Ref::HeapCell(h)));
                self[reg] = Addr::HeapCell(h);
            }
            QueryInstruction::SetValue(reg) => {
                let addr = self[reg];
                self.heap.push(HeapCellValue::from(addr));
            }
        }
    }

    // a fresh Structure cell followed by its Functor cell; returns the
    // functor cell's address.
    fn build_structure_cells(&mut self, arity: usize, f: Functor) -> usize {
        let h = self.heap.len();

        self.heap.push(HeapCellValue::Str(h + 1));
        self.heap.push(HeapCellValue::NamedStr(arity, f));

        h + 1
    }

    pub(crate) fn execute_fact_instr(&mut self, instr: FactInstruction) -> Result<(), MachineError> {
        match instr {
            FactInstruction::GetConstant(_, c, reg) => {
                let addr = self.deref(self[reg]);

                match self.store(addr) {
                    Addr::Con(c2) => {
                        if c != c2 {
                            self.fail = true;
                        }
                    }
                    Addr::HeapCell(hc) => self.bind(Ref::HeapCell(hc), Addr::Con(c))?,
                    Addr::StackCell(fr, sc) => self.bind(Ref::StackCell(fr, sc), Addr::Con(c))?,
                    Addr::Str(_) => self.fail = true,
                }
            }
            FactInstruction::GetStructure(_, f, arity, reg) => {
                let addr = self.deref(self[reg]);

                match self.store(addr) {
                    Addr::Str(a) => {
                        if let HeapCellValue::NamedStr(n2, f2) = self.heap[a] {
                            if n2 == arity && f2 == f {
                                self.s = a + 1;
                                self.mode = MachineMode::Read;
                            } else {
                                self.fail = true;
                            }
                        } else {
                            self.fail = true;
                        }
                    }
                    Addr::HeapCell(hc) => {
                        let h = self.build_structure_cells(arity, f);
                        self.bind(Ref::HeapCell(hc), Addr::Str(h))?;
                        self.mode = MachineMode::Write;
                    }
                    Addr::StackCell(fr, sc) => {
                        let h = self.build_structure_cells(arity, f);
                        self.bind(Ref::StackCell(fr, sc), Addr::Str(h))?;
                        self.mode = MachineMode::Write;
                    }
                    Addr::Con(_) => self.fail = true,
                }
            }
            FactInstruction::GetValue(norm, arg) => {
                let norm_addr = self[norm];
                let reg_addr = self.registers[arg];

                self.unify(norm_addr, reg_addr)?;
            }
            FactInstruction::GetVariable(norm, arg) => {
                self[norm] = self.registers[arg];
            }
            FactInstruction::UnifyConstant(c) => {
                match self.mode {
                    MachineMode::Read => {
                        let s = self.s;
                        self.unify(Addr::Con(c), Addr::HeapCell(s))?;
                    }
                    MachineMode::Write => {
                        self.heap.push(HeapCellValue::Con(c));
                    }
                }

                self.s += 1;
            }
            FactInstruction::UnifyVariable(reg) => {
                match self.mode {
                    MachineMode::Read => {
                        self[reg] = self.heap[self.s].as_addr(self.s);
                    }
                    MachineMode::Write => {
                        let h = self.heap.len();

                        self.heap.push(HeapCellValue::Ref(Ref::HeapCell(h)));
                        self[reg] = Addr::HeapCell(h);
                    }
                }

                self.s += 1;
            }
            FactInstruction::UnifyValue(reg) => {
                match self.mode {
                    MachineMode::Read => {
                        let s = self.s;
                        let addr = self[reg];

                        self.unify(addr, Addr::HeapCell(s))?;
                    }
                    MachineMode::Write => {
                        let addr = self[reg];
                        self.heap.push(HeapCellValue::from(addr));
                    }
                }

                self.s += 1;
            }
        }

        Ok(())
    }

    pub(crate) fn execute_choice_instr(
        &mut self,
        instr: ChoiceInstruction,
    ) -> Result<(), MachineError> {
        match instr {
            ChoiceInstruction::TryMeElse(offset) => {
                let gi = self.next_global_index();
                let n = self.num_of_args;

                self.or_stack.truncate(self.b);
                self.or_stack.push(
                    gi,
                    self.e,
                    self.cp,
                    self.b,
                    self.p + offset,
                    self.trail.len(),
                    self.heap.len(),
                    self.b0,
                    n,
                );

                self.b = self.or_stack.len();
                let b = self.b - 1;

                for i in 1..n + 1 {
                    self.or_stack[b][i] = self.registers[i];
                }

                self.hb = self.heap.len();
                self.p += 1;
            }
            ChoiceInstruction::RetryMeElse(offset) => {
                if self.b == 0 {
                    return Err(MachineError::ChoiceStackUnderflow);
                }

                let b = self.b - 1;
                let n = self.or_stack[b].num_args();

                for i in 1..n + 1 {
                    self.registers[i] = self.or_stack[b][i];
                }

                self.e = self.or_stack[b].e;
                self.cp = self.or_stack[b].cp;
                self.b0 = self.or_stack[b].b0;
                self.or_stack[b].bp = self.p + offset;

                let old_tr = self.or_stack[b].tr;
                self.unwind_trail(old_tr);

                let h = self.or_stack[b].h;
                self.heap.truncate(h);

                self.or_stack.truncate(self.b);
                self.hb = h;
                self.p += 1;
            }
            ChoiceInstruction::TrustMe => {
                if self.b == 0 {
                    return Err(MachineError::ChoiceStackUnderflow);
                }

                let b = self.b - 1;
                let n = self.or_stack[b].num_args();

                for i in 1..n + 1 {
                    self.registers[i] = self.or_stack[b][i];
                }

                self.e = self.or_stack[b].e;
                self.cp = self.or_stack[b].cp;
                self.b0 = self.or_stack[b].b0;

                let old_tr = self.or_stack[b].tr;
                self.unwind_trail(old_tr);

                let h = self.or_stack[b].h;
                self.heap.truncate(h);

                self.b = self.or_stack[b].b;
                self.or_stack.truncate(b);

                self.hb = h;
                self.p += 1;
            }
        }

        Ok(())
    }

    pub(crate) fn execute_cut_instr(&mut self, instr: CutInstruction) -> Result<(), MachineError> {
        match instr {
            CutInstruction::GetLevel => {
                if self.and_stack.is_empty() {
                    return Err(MachineError::MissingEnvironment);
                }

                let b0 = self.b0;
                let e = self.e;

                self.and_stack[e].b0 = b0;
                self.p += 1;
            }
            CutInstruction::Cut => {
                if self.and_stack.is_empty() {
                    return Err(MachineError::MissingEnvironment);
                }

                let e = self.e;
                let b0 = self.and_stack[e].b0;

                if self.b > b0 {
                    self.b = b0;
                    self.tidy_trail();
                }

                self.p += 1;
            }
        }

        Ok(())
    }
}

pub(crate) type CodeDir = IndexMap<Functor, usize, FxBuildHasher>;

/// The engine: compiled code, the label table, the functor table and the
/// clause database, plus the per-query machine state.
pub struct Machine {
    pub(crate) ms: MachineState,
    pub(crate) code: Code,
    pub(crate) code_dir: CodeDir,
    pub(crate) functors: FunctorTable,
    pub(crate) database: crate::dynamic_database::Database,
    pub(crate) cached_query: Code,
}

impl Default for Machine {
    fn default() -> Self {
        Machine::new()
    }
}

impl Machine {
    pub fn new() -> Self {
        let mut machine = Machine {
            ms: MachineState::new(),
            code: Code::new(),
            code_dir: CodeDir::default(),
            functors: FunctorTable::new(),
            database: crate::dynamic_database::Database::new(),
            cached_query: Code::new(),
        };

        crate::builtins::install(&mut machine);
        machine
    }

    /// The compiled code store; entries live until their logic frame pops.
    pub fn code(&self) -> &[Line] {
        &self.code
    }

    /// Entry address of a predicate's current clause chain.
    pub fn lookup(&self, name: &str, arity: usize) -> Option<usize> {
        let f = self.functors.get(name, arity)?;
        self.code_dir.get(&f).copied()
    }

    fn fetch(&self) -> Result<Line, MachineError> {
        match self.ms.p {
            CodePtr::DirEntry(p) => self.code.get(p).copied().ok_or(MachineError::BadJump(p)),
            CodePtr::TopLevel(p) => self
                .cached_query
                .get(p)
                .copied()
                .ok_or(MachineError::BadJump(p)),
        }
    }

    fn call_at(&mut self, f: Functor, arity: usize) {
        match self.code_dir.get(&f) {
            Some(&entry) => {
                self.ms.cp = self.ms.p + 1;
                self.ms.num_of_args = arity;
                self.ms.b0 = self.ms.b;
                self.ms.call_count += 1;
                self.ms.p = CodePtr::DirEntry(entry);
            }
            None => {
                // a predicate with no clauses fails rather than errors.
                self.ms.fail = true;
                self.ms.p += 1;
            }
        }
    }

    fn execute_ctrl_instr(&mut self, instr: ControlInstruction) -> Result<(), MachineError> {
        match instr {
            ControlInstruction::Allocate(num_cells) => {
                let gi = self.ms.next_global_index();

                self.ms
                    .and_stack
                    .push(gi, self.ms.e, self.ms.cp, num_cells);
                self.ms.e = self.ms.and_stack.len() - 1;
                self.ms.p += 1;
            }
            ControlInstruction::Call(f, arity) => {
                self.call_at(f, arity);
            }
            ControlInstruction::CallN(_) => {
                let addr = self.ms.deref(self.ms.registers[1]);

                match self.ms.store(addr) {
                    Addr::Con(c) => self.call_at(c, 0),
                    Addr::Str(a) => {
                        if let HeapCellValue::NamedStr(arity, f) = self.ms.heap[a] {
                            for i in 1..arity + 1 {
                                self.ms.registers[i] = Addr::HeapCell(a + i);
                            }

                            self.call_at(f, arity);
                        } else {
                            self.ms.fail = true;
                            self.ms.p += 1;
                        }
                    }
                    // an unbound or otherwise uncallable goal fails.
                    _ => {
                        self.ms.fail = true;
                        self.ms.p += 1;
                    }
                }
            }
            ControlInstruction::Deallocate => {
                if self.ms.and_stack.is_empty() {
                    return Err(MachineError::MissingEnvironment);
                }

                let e = self.ms.e;

                self.ms.p = self.ms.and_stack[e].cp;
                self.ms.e = self.ms.and_stack[e].e;
            }
            ControlInstruction::Done => {}
            ControlInstruction::Fail => {
                self.ms.fail = true;
                self.ms.p += 1;
            }
            ControlInstruction::Proceed => {
                self.ms.p = self.ms.cp;
            }
        }

        Ok(())
    }

    fn execute_line(&mut self, line: Line) -> Result<(), MachineError> {
        match line {
            Line::Choice(instr) => self.ms.execute_choice_instr(instr)?,
            Line::Control(instr) => self.execute_ctrl_instr(instr)?,
            Line::Cut(instr) => self.ms.execute_cut_instr(instr)?,
            Line::Fact(instr) => {
                self.ms.execute_fact_instr(instr)?;
                self.ms.p += 1;
            }
            Line::Query(instr) => {
                self.ms.execute_query_instr(instr);
                self.ms.p += 1;
            }
        }

        Ok(())
    }

    /// Drive the fetch/decode/execute loop until the query suspends at
    /// `Done` (an answer: `Ok(true)`) or fails with no remaining choice
    /// point (`Ok(false)`).
    pub(crate) fn query_stepper(&mut self) -> Result<bool, MachineError> {
        loop {
            if self.ms.fail {
                if self.ms.b == 0 {
                    return Ok(false);
                }

                let b = self.ms.b - 1;

                trace!(b = self.ms.b, "backtracking");

                self.ms.p = self.ms.or_stack[b].bp;
                self.ms.fail = false;
                continue;
            }

            let line = self.fetch()?;

            if let Line::Control(ControlInstruction::Done) = line {
                return Ok(true);
            }

            self.execute_line(line)?;
        }
    }

    /// Resume after a yielded answer: force a backtrack into the most
    /// recent choice point.
    pub(crate) fn continue_query(&mut self) -> Result<bool, MachineError> {
        if self.ms.b == 0 {
            return Ok(false);
        }

        self.ms.fail = true;
        self.query_stepper()
    }
}
