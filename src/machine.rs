use std::collections::HashMap;
use std::time::Instant;

use arcstr::{ArcStr, Substr};

use crate::cell::{floored_div, floored_mod, Cell};
use crate::compile::compile;
use crate::error::{Error, Fault};
use crate::input::Input;
use crate::opcodes::*;
use crate::output::{Dtype, Output, Scalar};

/// Inputs handed to `begin`/`run`, keyed by declared input name. Extra
/// entries are ignored; a missing declared name is an error.
pub type Inputs = HashMap<String, Input>;

/// A stack machine compiled from one source program. `T` is the cell width:
/// the data stack, the variables, and the bytecode stream all use it.
///
/// A machine is built once and then driven through sessions: `begin` binds
/// inputs and allocates outputs, `run`/`step`/`resume`/`call` execute, and
/// `reset` discards the session. Runtime faults latch until `reset`.
#[derive(Debug)]
pub struct Machine<T: Cell> {
    source: ArcStr,
    pub(crate) bytecodes: Vec<T>,
    pub(crate) offsets: Vec<usize>,
    pub(crate) variable_names: Vec<Substr>,
    pub(crate) input_names: Vec<Substr>,
    pub(crate) output_names: Vec<Substr>,
    pub(crate) output_dtypes: Vec<Dtype>,
    pub(crate) dictionary_names: Vec<Substr>,
    pub(crate) dictionary_codes: Vec<i64>,

    stack_max: usize,
    recursion_max: usize,
    output_initial_size: usize,
    output_resize_factor: f64,

    stack: Vec<T>,
    variables: Vec<T>,
    inputs: Vec<Input>,
    outputs: Vec<Output>,
    is_ready: bool,
    frames: Vec<Frame>,
    do_stack: Vec<DoFrame<T>>,
    target_depth: Vec<usize>,
    current_error: Option<Fault>,

    count_instructions: u64,
    count_reads: u64,
    count_writes: u64,
    count_nanoseconds: u64,
}

pub type Machine32 = Machine<i32>;
pub type Machine64 = Machine<i64>;

/// One entry on the recursion stack: a segment and a cursor into it.
#[derive(Clone, Copy, Debug)]
struct Frame {
    which: usize,
    at: usize,
}

/// One active `do ... loop`. `depth` is the absolute recursion depth of the
/// segment that executed the `do`; the loop body re-enters only while the
/// machine is back at that depth.
#[derive(Clone, Copy, Debug)]
struct DoFrame<T> {
    depth: usize,
    stop: T,
    i: T,
    step: bool,
}

impl<T: Cell> Machine<T> {
    /// Tokenize and compile `source` eagerly; compile errors are returned
    /// here and never at run time.
    pub fn new(
        source: &str,
        stack_max_depth: usize,
        recursion_max_depth: usize,
        output_initial_size: usize,
        output_resize_factor: f64,
    ) -> Result<Machine<T>, Error> {
        let source = ArcStr::from(source);
        let program = compile::<T>(&source)?;
        let variables = vec![T::zero(); program.variable_names.len()];
        Ok(Machine {
            source,
            bytecodes: program.bytecodes,
            offsets: program.offsets,
            variable_names: program.variable_names,
            input_names: program.input_names,
            output_names: program.output_names,
            output_dtypes: program.output_dtypes,
            dictionary_names: program.dictionary_names,
            dictionary_codes: program.dictionary_codes,
            stack_max: stack_max_depth,
            recursion_max: recursion_max_depth,
            output_initial_size,
            output_resize_factor,
            stack: Vec::with_capacity(stack_max_depth.min(1024)),
            variables,
            inputs: Vec::new(),
            outputs: Vec::new(),
            is_ready: false,
            frames: Vec::new(),
            do_stack: Vec::new(),
            target_depth: Vec::new(),
            current_error: None,
            count_instructions: 0,
            count_reads: 0,
            count_writes: 0,
            count_nanoseconds: 0,
        })
    }

    // -- session lifecycle ---------------------------------------------------

    /// Discard all session state: stack, variables, inputs, outputs, frames,
    /// and any latched fault.
    pub fn reset(&mut self) {
        self.stack.clear();
        for v in self.variables.iter_mut() {
            *v = T::zero();
        }
        self.inputs.clear();
        self.outputs.clear();
        self.is_ready = false;
        self.frames.clear();
        self.do_stack.clear();
        self.target_depth.clear();
        self.current_error = None;
    }

    /// Start a session: bind every declared input, allocate outputs of the
    /// declared dtypes, and park the machine at the top of the program.
    pub fn begin(&mut self, mut inputs: Inputs) -> Result<(), Error> {
        self.reset();
        let mut bound = Vec::with_capacity(self.input_names.len());
        for name in &self.input_names {
            match inputs.remove(name.as_str()) {
                Some(input) => bound.push(input),
                None => return Err(Error::MissingInput(name.to_string())),
            }
        }
        self.inputs = bound;
        self.outputs = self
            .output_dtypes
            .iter()
            .map(|&dtype| Output::new(dtype, self.output_initial_size))
            .collect();
        self.target_depth.push(0);
        if let Err(fault) = self.push_frame(0) {
            self.current_error = Some(fault);
            return Err(fault.into());
        }
        self.is_ready = true;
        Ok(())
    }

    /// `begin` then execute to completion (or to a `pause`).
    pub fn run(&mut self, inputs: Inputs) -> Result<(), Error> {
        self.begin(inputs)?;
        self.drive(false)
    }

    /// Execute exactly one instruction.
    pub fn step(&mut self) -> Result<(), Error> {
        self.precheck()?;
        self.drive(true)
    }

    /// Continue after a `pause` (or after `step`s).
    pub fn resume(&mut self) -> Result<(), Error> {
        self.precheck()?;
        self.drive(false)
    }

    /// Invoke a dictionary word as if it were the program, returning when
    /// the word returns. The data stack carries arguments and results.
    pub fn call(&mut self, name: &str) -> Result<(), Error> {
        match self.dictionary_names.iter().position(|n| n.as_str() == name) {
            Some(index) => self.call_at(index),
            None => Err(Error::UnknownWord(name.to_string())),
        }
    }

    pub fn call_at(&mut self, index: usize) -> Result<(), Error> {
        if !self.is_ready {
            self.current_error = Some(Fault::NotReady);
            return Err(Fault::NotReady.into());
        }
        if let Some(fault) = self.current_error {
            return Err(fault.into());
        }
        let code = match self.dictionary_codes.get(index) {
            Some(&code) => code,
            None => return Err(Error::UnknownWord(index.to_string())),
        };
        self.target_depth.push(self.frames.len());
        if let Err(fault) = self.push_frame((code - BOUND_DICTIONARY) as usize) {
            self.current_error = Some(fault);
            return Err(fault.into());
        }
        self.drive(false)
    }

    fn precheck(&mut self) -> Result<(), Fault> {
        if !self.is_ready {
            self.current_error = Some(Fault::NotReady);
            return Err(Fault::NotReady);
        }
        if self.is_done() {
            self.current_error = Some(Fault::IsDone);
            return Err(Fault::IsDone);
        }
        if let Some(fault) = self.current_error {
            return Err(fault);
        }
        Ok(())
    }

    /// Time one engine entry, latch any fault, and retire the target depth
    /// once execution has unwound back to it.
    fn drive(&mut self, single_step: bool) -> Result<(), Error> {
        let target = self.target_depth.last().copied().unwrap_or(0);
        let clock = Instant::now();
        let outcome = self.internal_run(single_step, target);
        self.count_nanoseconds += clock.elapsed().as_nanos() as u64;
        if let Err(fault) = outcome {
            self.current_error = Some(fault);
        }
        if self.target_depth.last() == Some(&self.frames.len()) {
            self.target_depth.pop();
        }
        match self.current_error {
            Some(fault) => Err(fault.into()),
            None => Ok(()),
        }
    }

    // -- observable state ----------------------------------------------------

    pub fn is_ready(&self) -> bool {
        self.is_ready
    }

    /// True when no segment is on the recursion stack.
    pub fn is_done(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn current_error(&self) -> Option<Fault> {
        self.current_error
    }

    /// The latched fault as a result, with an ignore list for faults the
    /// caller treats as normal termination (typically `UserHalt`, `IsDone`).
    pub fn check(&self, ignore: &[Fault]) -> Result<(), Fault> {
        match self.current_error {
            Some(fault) if !ignore.contains(&fault) => Err(fault),
            _ => Ok(()),
        }
    }

    /// Absolute position in the flat bytecode stream, or -1 if no
    /// instruction is current.
    pub fn current_bytecode_position(&self) -> i64 {
        match self.frames.last() {
            Some(frame) if frame.at < self.segment_len(frame.which) => {
                (self.offsets[frame.which] + frame.at) as i64
            }
            _ => -1,
        }
    }

    /// Recursion depth relative to the innermost `begin`/`call` target, or
    /// -1 when no target is active.
    pub fn current_recursion_depth(&self) -> i64 {
        match self.target_depth.last() {
            Some(&target) => self.frames.len() as i64 - target as i64,
            None => -1,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn bytecodes(&self) -> &[T] {
        &self.bytecodes
    }

    /// Segment boundaries: segment `k` is `bytecodes[offsets[k]..offsets[k+1]]`.
    pub fn bytecode_offsets(&self) -> &[usize] {
        &self.offsets
    }

    pub fn dictionary(&self) -> Vec<String> {
        self.dictionary_names.iter().map(|n| n.to_string()).collect()
    }

    pub fn stack_max_depth(&self) -> usize {
        self.stack_max
    }

    pub fn recursion_max_depth(&self) -> usize {
        self.recursion_max
    }

    pub fn output_initial_size(&self) -> usize {
        self.output_initial_size
    }

    pub fn output_resize_factor(&self) -> f64 {
        self.output_resize_factor
    }

    pub fn stack(&self) -> &[T] {
        &self.stack
    }

    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    /// Peek `from_top` cells below the top (0 is the top itself).
    pub fn stack_at(&self, from_top: usize) -> Option<T> {
        let n = self.stack.len();
        n.checked_sub(from_top + 1).map(|i| self.stack[i])
    }

    pub fn stack_clear(&mut self) {
        self.stack.clear();
    }

    /// Host-side push, e.g. to pass arguments before `call`.
    pub fn stack_push(&mut self, value: T) -> Result<(), Error> {
        if self.stack.len() == self.stack_max {
            return Err(Fault::StackOverflow.into());
        }
        self.stack.push(value);
        Ok(())
    }

    pub fn stack_pop(&mut self) -> Result<T, Error> {
        self.stack.pop().ok_or_else(|| Fault::StackUnderflow.into())
    }

    pub fn variable_names(&self) -> Vec<String> {
        self.variable_names.iter().map(|n| n.to_string()).collect()
    }

    pub fn variable(&self, name: &str) -> Option<T> {
        let i = self.variable_names.iter().position(|n| n.as_str() == name)?;
        Some(self.variables[i])
    }

    pub fn variable_at(&self, index: usize) -> Option<T> {
        self.variables.get(index).copied()
    }

    pub fn variables(&self) -> HashMap<String, T> {
        self.variable_names
            .iter()
            .zip(&self.variables)
            .map(|(n, &v)| (n.to_string(), v))
            .collect()
    }

    /// Cursor position of a bound input; `None` before `begin` or for an
    /// unknown name.
    pub fn input_position(&self, name: &str) -> Option<usize> {
        let i = self.input_names.iter().position(|n| n.as_str() == name)?;
        self.inputs.get(i).map(|input| input.pos())
    }

    pub fn output_names(&self) -> Vec<String> {
        self.output_names.iter().map(|n| n.to_string()).collect()
    }

    pub fn output_dtype(&self, name: &str) -> Option<Dtype> {
        let i = self.output_names.iter().position(|n| n.as_str() == name)?;
        Some(self.output_dtypes[i])
    }

    /// A bound output buffer; `None` before `begin` or for an unknown name.
    pub fn output(&self, name: &str) -> Option<&Output> {
        let i = self.output_names.iter().position(|n| n.as_str() == name)?;
        self.outputs.get(i)
    }

    pub fn output_at(&self, index: usize) -> Option<&Output> {
        self.outputs.get(index)
    }

    // -- counters ------------------------------------------------------------

    pub fn count_instructions(&self) -> u64 {
        self.count_instructions
    }

    pub fn count_reads(&self) -> u64 {
        self.count_reads
    }

    pub fn count_writes(&self) -> u64 {
        self.count_writes
    }

    pub fn count_nanoseconds(&self) -> u64 {
        self.count_nanoseconds
    }

    pub fn count_reset(&mut self) {
        self.count_instructions = 0;
        self.count_reads = 0;
        self.count_writes = 0;
        self.count_nanoseconds = 0;
    }

    // -- engine --------------------------------------------------------------

    fn segment_len(&self, which: usize) -> usize {
        self.offsets[which + 1] - self.offsets[which]
    }

    fn fetch(&self) -> T {
        match self.frames.last() {
            Some(frame) => self.bytecodes[self.offsets[frame.which] + frame.at],
            None => T::zero(),
        }
    }

    fn operand(&mut self) -> T {
        let v = self.fetch();
        self.advance(1);
        v
    }

    fn operand_index(&mut self) -> usize {
        self.operand().to_i64() as usize
    }

    fn advance(&mut self, n: usize) {
        if let Some(frame) = self.frames.last_mut() {
            frame.at += n;
        }
    }

    fn retreat(&mut self, n: usize) {
        if let Some(frame) = self.frames.last_mut() {
            frame.at -= n;
        }
    }

    fn push_frame(&mut self, which: usize) -> Result<(), Fault> {
        if self.frames.len() == self.recursion_max {
            return Err(Fault::RecursionDepthExceeded);
        }
        self.frames.push(Frame { which, at: 0 });
        Ok(())
    }

    fn push(&mut self, value: T) -> Result<(), Fault> {
        if self.stack.len() == self.stack_max {
            return Err(Fault::StackOverflow);
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Result<T, Fault> {
        self.stack.pop().ok_or(Fault::StackUnderflow)
    }

    fn peek(&self) -> Result<T, Fault> {
        self.stack.last().copied().ok_or(Fault::StackUnderflow)
    }

    /// Pop two cells; returns them in push order (deeper one first).
    fn pop2(&mut self) -> Result<(T, T), Fault> {
        let n = self.stack.len();
        if n < 2 {
            return Err(Fault::StackUnderflow);
        }
        let a = self.stack[n - 2];
        let b = self.stack[n - 1];
        self.stack.truncate(n - 2);
        Ok((a, b))
    }

    fn unary(&mut self, f: impl FnOnce(T) -> T) -> Result<(), Fault> {
        let top = self.stack.last_mut().ok_or(Fault::StackUnderflow)?;
        *top = f(*top);
        Ok(())
    }

    fn binary(&mut self, f: impl FnOnce(T, T) -> T) -> Result<(), Fault> {
        let (a, b) = self.pop2()?;
        self.stack.push(f(a, b));
        Ok(())
    }

    /// Loop index `back` frames below the top of the do-stack (0 = `i`).
    fn do_index(&self, back: usize) -> Result<T, Fault> {
        self.do_stack
            .len()
            .checked_sub(back + 1)
            .map(|at| self.do_stack[at].i)
            .ok_or(Fault::StackUnderflow)
    }

    /// Pop the finished segment and, if a do-frame belongs to the depth we
    /// land on, advance its loop index (by the stack-supplied step for
    /// `+loop`).
    fn finish_segment(&mut self) -> Result<(), Fault> {
        self.frames.pop();
        if let Some(frame) = self.do_stack.last_mut() {
            if frame.depth == self.frames.len() {
                if frame.step {
                    let step = self.stack.pop().ok_or(Fault::StackUnderflow)?;
                    frame.i = frame.i.wrapping_add(&step);
                } else {
                    frame.i = frame.i.wrapping_add(&T::one());
                }
            }
        }
        Ok(())
    }

    fn finish_segment_if_done(&mut self) -> Result<(), Fault> {
        let done = match self.frames.last() {
            Some(frame) => frame.at >= self.segment_len(frame.which),
            None => false,
        };
        if done {
            self.finish_segment()?;
        }
        Ok(())
    }

    /// The dispatch loop. Runs until the recursion depth unwinds to
    /// `target`, a `pause` or fault returns early, or (in single-step mode)
    /// one instruction retires.
    fn internal_run(&mut self, single_step: bool, target: usize) -> Result<(), Fault> {
        'run: while self.frames.len() != target {
            'segment: loop {
                let (which, at) = match self.frames.last() {
                    Some(frame) => (frame.which, frame.at),
                    None => break 'segment,
                };
                if at >= self.segment_len(which) {
                    break 'segment;
                }
                let bytecode = self.bytecodes[self.offsets[which] + at].to_i64();

                // A do-frame owned by this depth pins the cursor on the loop
                // body until the index reaches its stop.
                match self.do_stack.last().copied() {
                    Some(frame) if frame.depth == self.frames.len() => {
                        if frame.i >= frame.stop {
                            self.do_stack.pop();
                            self.advance(1);
                            continue 'segment;
                        }
                    }
                    _ => self.advance(1),
                }

                if bytecode < 0 {
                    self.typed_io(bytecode)?;
                } else if bytecode >= BOUND_DICTIONARY {
                    self.push_frame((bytecode - BOUND_DICTIONARY) as usize)?;
                } else {
                    match bytecode {
                        CODE_LITERAL => {
                            let num = self.operand();
                            self.push(num)?;
                        }
                        CODE_HALT => {
                            self.is_ready = false;
                            self.frames.clear();
                            self.do_stack.clear();
                            self.target_depth.truncate(1);
                            self.count_instructions += 1;
                            return Err(Fault::UserHalt);
                        }
                        CODE_PAUSE => {
                            self.finish_segment_if_done()?;
                            self.count_instructions += 1;
                            return Ok(());
                        }
                        CODE_IF => {
                            // Nonzero predicate falls through into the
                            // consequent's segment reference.
                            if self.pop()? == T::zero() {
                                self.advance(1);
                            }
                        }
                        CODE_IF_ELSE => {
                            if self.pop()? == T::zero() {
                                self.advance(1);
                            } else {
                                let consequent = self.fetch().to_i64();
                                self.advance(2);
                                self.push_frame((consequent - BOUND_DICTIONARY) as usize)?;
                                self.count_instructions += 1;
                            }
                        }
                        CODE_DO | CODE_DO_STEP => {
                            let (stop, start) = self.pop2()?;
                            if self.do_stack.len() == self.recursion_max {
                                return Err(Fault::RecursionDepthExceeded);
                            }
                            self.do_stack.push(DoFrame {
                                depth: self.frames.len(),
                                stop,
                                i: start,
                                step: bytecode == CODE_DO_STEP,
                            });
                        }
                        CODE_AGAIN => {
                            self.retreat(2);
                        }
                        CODE_UNTIL => {
                            if self.pop()? == T::zero() {
                                self.retreat(2);
                            }
                        }
                        CODE_WHILE => {
                            if self.pop()? == T::zero() {
                                self.advance(1);
                            } else {
                                let postcondition = self.fetch().to_i64();
                                self.retreat(2);
                                self.push_frame((postcondition - BOUND_DICTIONARY) as usize)?;
                                self.count_instructions += 1;
                            }
                        }
                        CODE_EXIT => {
                            let exitdepth = self.operand().to_i64() as usize;
                            let depth = self.frames.len().saturating_sub(exitdepth);
                            self.frames.truncate(depth);
                            while self.do_stack.last().map_or(false, |f| f.depth > depth) {
                                self.do_stack.pop();
                            }
                            self.count_instructions += 1;
                            self.finish_segment()?;
                            if single_step {
                                return Ok(());
                            }
                            continue 'run;
                        }
                        CODE_PUT => {
                            let index = self.operand_index();
                            let value = self.pop()?;
                            self.variables[index] = value;
                        }
                        CODE_INC => {
                            let index = self.operand_index();
                            let value = self.pop()?;
                            self.variables[index] = self.variables[index].wrapping_add(&value);
                        }
                        CODE_GET => {
                            let index = self.operand_index();
                            let value = self.variables[index];
                            self.push(value)?;
                        }
                        CODE_LEN_INPUT => {
                            let index = self.operand_index();
                            let len = T::from_i64(self.inputs[index].len() as i64);
                            self.push(len)?;
                        }
                        CODE_POS => {
                            let index = self.operand_index();
                            let pos = T::from_i64(self.inputs[index].pos() as i64);
                            self.push(pos)?;
                        }
                        CODE_END => {
                            let index = self.operand_index();
                            let end = T::truth(self.inputs[index].end());
                            self.push(end)?;
                        }
                        CODE_SEEK => {
                            let index = self.operand_index();
                            let to = self.pop()?;
                            self.inputs[index].seek(to.to_i64())?;
                        }
                        CODE_SKIP => {
                            let index = self.operand_index();
                            let n = self.pop()?;
                            self.inputs[index].skip(n.to_i64())?;
                        }
                        CODE_WRITE => {
                            let index = self.operand_index();
                            let value = self.pop()?;
                            self.outputs[index].push(Scalar::Int(value.to_i64()));
                            self.count_writes += 1;
                        }
                        CODE_LEN_OUTPUT => {
                            let index = self.operand_index();
                            let len = T::from_i64(self.outputs[index].len() as i64);
                            self.push(len)?;
                        }
                        CODE_REWIND => {
                            let index = self.operand_index();
                            let n = self.pop()?;
                            self.outputs[index].rewind(n.to_i64())?;
                        }
                        CODE_I => {
                            let v = self.do_index(0)?;
                            self.push(v)?;
                        }
                        CODE_J => {
                            let v = self.do_index(1)?;
                            self.push(v)?;
                        }
                        CODE_K => {
                            let v = self.do_index(2)?;
                            self.push(v)?;
                        }
                        CODE_DUP => {
                            let v = self.peek()?;
                            self.push(v)?;
                        }
                        CODE_DROP => {
                            self.pop()?;
                        }
                        CODE_SWAP => {
                            let n = self.stack.len();
                            if n < 2 {
                                return Err(Fault::StackUnderflow);
                            }
                            self.stack.swap(n - 1, n - 2);
                        }
                        CODE_OVER => {
                            let n = self.stack.len();
                            if n < 2 {
                                return Err(Fault::StackUnderflow);
                            }
                            let v = self.stack[n - 2];
                            self.push(v)?;
                        }
                        CODE_ROT => {
                            let n = self.stack.len();
                            if n < 3 {
                                return Err(Fault::StackUnderflow);
                            }
                            let tmp = self.stack[n - 3];
                            self.stack[n - 3] = self.stack[n - 2];
                            self.stack[n - 2] = self.stack[n - 1];
                            self.stack[n - 1] = tmp;
                        }
                        CODE_NIP => {
                            let n = self.stack.len();
                            if n < 2 {
                                return Err(Fault::StackUnderflow);
                            }
                            self.stack[n - 2] = self.stack[n - 1];
                            self.stack.truncate(n - 1);
                        }
                        CODE_TUCK => {
                            let n = self.stack.len();
                            if n < 2 {
                                return Err(Fault::StackUnderflow);
                            }
                            let top = self.stack[n - 1];
                            self.stack[n - 1] = self.stack[n - 2];
                            self.stack[n - 2] = top;
                            self.push(top)?;
                        }
                        CODE_ADD => self.binary(|a, b| a.wrapping_add(&b))?,
                        CODE_SUB => self.binary(|a, b| a.wrapping_sub(&b))?,
                        CODE_MUL => self.binary(|a, b| a.wrapping_mul(&b))?,
                        CODE_DIV => {
                            let (a, b) = self.pop2()?;
                            if b == T::zero() {
                                return Err(Fault::DivisionByZero);
                            }
                            self.stack.push(floored_div(a, b));
                        }
                        CODE_MOD => {
                            let (a, b) = self.pop2()?;
                            if b == T::zero() {
                                return Err(Fault::DivisionByZero);
                            }
                            self.stack.push(floored_mod(a, b));
                        }
                        CODE_DIVMOD => {
                            let (a, b) = self.pop2()?;
                            if b == T::zero() {
                                return Err(Fault::DivisionByZero);
                            }
                            self.stack.push(floored_mod(a, b));
                            self.stack.push(floored_div(a, b));
                        }
                        CODE_NEGATE => self.unary(|v| v.wrapping_neg())?,
                        CODE_ADD1 => self.unary(|v| v.wrapping_add(&T::one()))?,
                        CODE_SUB1 => self.unary(|v| v.wrapping_sub(&T::one()))?,
                        CODE_ABS => self.unary(|v| {
                            if v < T::zero() {
                                v.wrapping_neg()
                            } else {
                                v
                            }
                        })?,
                        CODE_MIN => self.binary(|a, b| a.min(b))?,
                        CODE_MAX => self.binary(|a, b| a.max(b))?,
                        CODE_EQ => self.binary(|a, b| T::truth(a == b))?,
                        CODE_NE => self.binary(|a, b| T::truth(a != b))?,
                        CODE_GT => self.binary(|a, b| T::truth(a > b))?,
                        CODE_GE => self.binary(|a, b| T::truth(a >= b))?,
                        CODE_LT => self.binary(|a, b| T::truth(a < b))?,
                        CODE_LE => self.binary(|a, b| T::truth(a <= b))?,
                        CODE_EQ0 => self.unary(|v| T::truth(v == T::zero()))?,
                        CODE_INVERT => self.unary(|v| !v)?,
                        CODE_AND => self.binary(|a, b| a & b)?,
                        CODE_OR => self.binary(|a, b| a | b)?,
                        CODE_XOR => self.binary(|a, b| a ^ b)?,
                        CODE_LSHIFT => {
                            self.binary(|a, b| a.wrapping_shl(b.to_i64() as u32))?
                        }
                        CODE_RSHIFT => {
                            self.binary(|a, b| a.wrapping_shr(b.to_i64() as u32))?
                        }
                        CODE_FALSE => self.push(T::zero())?,
                        CODE_TRUE => self.push(T::truth(true))?,
                        _ => {}
                    }
                }

                self.count_instructions += 1;
                if single_step {
                    self.finish_segment_if_done()?;
                    return Ok(());
                }
            }
            self.finish_segment()?;
        }
        Ok(())
    }

    /// Negative bytecode: decode the flag bits, read from the named input,
    /// and either push cells or append straight into an output buffer.
    fn typed_io(&mut self, bytecode: i64) -> Result<(), Fault> {
        let flags = !bytecode;
        let big = flags & READ_BIGENDIAN != 0;
        let kind = match ReadKind::from_code(flags & READ_MASK) {
            Some(kind) => kind,
            None => return Err(Fault::ReadBeyond),
        };
        let in_num = self.operand_index();
        let num_items = if flags & READ_REPEATED != 0 {
            self.pop()?.to_i64()
        } else {
            1
        };
        let width = kind.width();
        let nbytes = num_items
            .checked_mul(width as i64)
            .ok_or(Fault::ReadBeyond)?;
        if flags & READ_DIRECT != 0 {
            let out_num = self.operand_index();
            let bytes = self.inputs[in_num].read(nbytes)?;
            let out = &mut self.outputs[out_num];
            for chunk in bytes.chunks_exact(width) {
                out.push(kind.decode(chunk, big));
            }
            self.count_writes += 1;
        } else {
            let bytes = self.inputs[in_num].read(nbytes)?;
            if self.stack.len() + num_items.max(0) as usize > self.stack_max {
                return Err(Fault::StackOverflow);
            }
            for chunk in bytes.chunks_exact(width) {
                self.stack.push(T::from_scalar(kind.decode(chunk, big)));
            }
        }
        self.count_reads += 1;
        Ok(())
    }
}
