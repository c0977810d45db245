//! Decompiler: reconstruct source-like text from bytecodes, using the same
//! positional rules the engine uses to decode instruction widths.

use crate::cell::Cell;
use crate::machine::Machine;
use crate::opcodes::*;

impl<T: Cell> Machine<T> {
    /// Source-like rendering of the whole program: declarations first, then
    /// each dictionary word, then the top-level segment.
    pub fn decompiled(&self) -> String {
        let mut out = String::new();
        let mut first = true;
        for name in &self.variable_names {
            first = false;
            out.push_str("variable ");
            out.push_str(name.as_str());
            out.push('\n');
        }
        for name in &self.input_names {
            first = false;
            out.push_str("input ");
            out.push_str(name.as_str());
            out.push('\n');
        }
        for (name, dtype) in self.output_names.iter().zip(&self.output_dtypes) {
            first = false;
            out.push_str("output ");
            out.push_str(name.as_str());
            out.push(' ');
            out.push_str(dtype.name());
            out.push('\n');
        }
        for (name, &code) in self.dictionary_names.iter().zip(&self.dictionary_codes) {
            if !first {
                out.push('\n');
            }
            first = false;
            let segment = (code - BOUND_DICTIONARY) as usize;
            out.push_str(": ");
            out.push_str(name.as_str());
            out.push('\n');
            if self.segment_nonempty(segment) {
                out.push_str("  ");
            }
            out.push_str(&self.decompiled_segment(segment, "  "));
            out.push_str(";\n");
        }
        if !first && self.offsets[1] != 0 {
            out.push('\n');
        }
        out.push_str(&self.decompiled_segment(0, ""));
        out
    }

    /// The single instruction at the machine's current position, if any.
    pub fn current_instruction(&self) -> Option<String> {
        let at = self.current_bytecode_position();
        if at < 0 {
            None
        } else {
            Some(self.decompiled_at(at as usize, ""))
        }
    }

    fn segment_nonempty(&self, segment: usize) -> bool {
        self.offsets[segment] != self.offsets[segment + 1]
    }

    fn decompiled_segment(&self, segment: usize, indent: &str) -> String {
        let mut out = String::new();
        let start = self.offsets[segment];
        let stop = self.offsets[segment + 1];
        let mut at = start;
        while at < stop {
            if at != start {
                out.push_str(indent);
            }
            out.push_str(&self.decompiled_at(at, indent));
            out.push('\n');
            at += self.width_at(at);
        }
        out
    }

    /// Slots occupied by the instruction at `at`, decided positionally.
    fn width_at(&self, at: usize) -> usize {
        let bytecode = self.bytecodes[at].to_i64();
        let next = if at + 1 < self.bytecodes.len() {
            self.bytecodes[at + 1].to_i64()
        } else {
            0
        };
        if bytecode < 0 {
            if !bytecode & READ_DIRECT != 0 {
                3
            } else {
                2
            }
        } else if bytecode >= BOUND_DICTIONARY && (next == CODE_AGAIN || next == CODE_UNTIL) {
            2
        } else if bytecode >= BOUND_DICTIONARY && next == CODE_WHILE {
            3
        } else {
            match bytecode {
                CODE_IF_ELSE => 3,
                CODE_LITERAL | CODE_IF | CODE_DO | CODE_DO_STEP | CODE_EXIT | CODE_PUT
                | CODE_INC | CODE_GET | CODE_LEN_INPUT | CODE_POS | CODE_END | CODE_SEEK
                | CODE_SKIP | CODE_WRITE | CODE_LEN_OUTPUT | CODE_REWIND => 2,
                _ => 1,
            }
        }
    }

    fn body_block(&self, segment: usize, indent: &str) -> String {
        let mut out = String::new();
        if self.segment_nonempty(segment) {
            out.push_str(indent);
            out.push_str("  ");
        }
        out.push_str(&self.decompiled_segment(segment, &format!("{}  ", indent)));
        out
    }

    fn decompiled_at(&self, at: usize, indent: &str) -> String {
        let bytecode = self.bytecodes[at].to_i64();
        let next = if at + 1 < self.bytecodes.len() {
            self.bytecodes[at + 1].to_i64()
        } else {
            0
        };

        if bytecode < 0 {
            let flags = !bytecode;
            let input = self.input_names[next as usize].as_str();
            let mut word = String::new();
            if flags & READ_REPEATED != 0 {
                word.push('#');
            }
            if flags & READ_BIGENDIAN != 0 {
                word.push('!');
            }
            match ReadKind::from_code(flags & READ_MASK) {
                Some(kind) => word.push_str(kind.word()),
                None => return format!("(unrecognized bytecode {})", bytecode),
            }
            let target = if flags & READ_DIRECT != 0 {
                self.output_names[self.bytecodes[at + 2].to_i64() as usize].as_str()
            } else {
                "stack"
            };
            return format!("{} {} {}", input, word, target);
        }

        if bytecode >= BOUND_DICTIONARY && next == CODE_AGAIN {
            let body = (bytecode - BOUND_DICTIONARY) as usize;
            return format!("begin\n{}{}again", self.body_block(body, indent), indent);
        }
        if bytecode >= BOUND_DICTIONARY && next == CODE_UNTIL {
            let body = (bytecode - BOUND_DICTIONARY) as usize;
            return format!("begin\n{}{}until", self.body_block(body, indent), indent);
        }
        if bytecode >= BOUND_DICTIONARY && next == CODE_WHILE {
            let precondition = (bytecode - BOUND_DICTIONARY) as usize;
            let postcondition = (self.bytecodes[at + 2].to_i64() - BOUND_DICTIONARY) as usize;
            return format!(
                "begin\n{}{}while\n{}{}repeat",
                self.body_block(precondition, indent),
                indent,
                self.body_block(postcondition, indent),
                indent
            );
        }
        if bytecode >= BOUND_DICTIONARY {
            for (name, &code) in self.dictionary_names.iter().zip(&self.dictionary_codes) {
                if code == bytecode {
                    return name.to_string();
                }
            }
            return format!("(anonymous segment at {})", bytecode - BOUND_DICTIONARY);
        }

        match bytecode {
            CODE_LITERAL => format!("{}", self.bytecodes[at + 1]),
            CODE_HALT => "halt".to_string(),
            CODE_PAUSE => "pause".to_string(),
            CODE_IF => {
                let body = (next - BOUND_DICTIONARY) as usize;
                format!("if\n{}{}then", self.body_block(body, indent), indent)
            }
            CODE_IF_ELSE => {
                let consequent = (next - BOUND_DICTIONARY) as usize;
                let alternate = (self.bytecodes[at + 2].to_i64() - BOUND_DICTIONARY) as usize;
                format!(
                    "if\n{}{}else\n{}{}then",
                    self.body_block(consequent, indent),
                    indent,
                    self.body_block(alternate, indent),
                    indent
                )
            }
            CODE_DO => {
                let body = (next - BOUND_DICTIONARY) as usize;
                format!("do\n{}{}loop", self.body_block(body, indent), indent)
            }
            CODE_DO_STEP => {
                let body = (next - BOUND_DICTIONARY) as usize;
                format!("do\n{}{}+loop", self.body_block(body, indent), indent)
            }
            CODE_EXIT => "exit".to_string(),
            CODE_PUT => format!("{} !", self.variable_names[next as usize]),
            CODE_INC => format!("{} +!", self.variable_names[next as usize]),
            CODE_GET => format!("{} @", self.variable_names[next as usize]),
            CODE_LEN_INPUT => format!("{} len", self.input_names[next as usize]),
            CODE_POS => format!("{} pos", self.input_names[next as usize]),
            CODE_END => format!("{} end", self.input_names[next as usize]),
            CODE_SEEK => format!("{} seek", self.input_names[next as usize]),
            CODE_SKIP => format!("{} skip", self.input_names[next as usize]),
            CODE_WRITE => format!("{} <- stack", self.output_names[next as usize]),
            CODE_LEN_OUTPUT => format!("{} len", self.output_names[next as usize]),
            CODE_REWIND => format!("{} rewind", self.output_names[next as usize]),
            _ => match builtin_name(bytecode) {
                Some(name) => name.to_string(),
                None => format!("(unrecognized bytecode {})", bytecode),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::machine::{Inputs, Machine, Machine64};

    fn machine(src: &str) -> Machine64 {
        Machine::new(src, 32, 16, 8, 1.5).unwrap()
    }

    #[test]
    fn test_simple_program() {
        let m = machine("1 2 + dup");
        assert_eq!("1\n2\n+\ndup\n", m.decompiled());
    }

    #[test]
    fn test_declarations_and_words() {
        let m = machine("variable v input src output dst int32 : f 1 v ! ; f");
        let text = m.decompiled();
        assert!(text.starts_with("variable v\ninput src\noutput dst int32\n"));
        assert!(text.contains("\n: f\n  1\n  v !\n;\n"));
        assert!(text.ends_with("\nf\n"));
    }

    #[test]
    fn test_control_structures() {
        let m = machine("1 if 2 else 3 then");
        assert_eq!("1\nif\n  2\nelse\n  3\nthen\n", m.decompiled());

        let m = machine("10 0 do i loop");
        assert_eq!("10\n0\ndo\n  i\nloop\n", m.decompiled());

        let m = machine("10 0 do i 2 +loop");
        assert!(m.decompiled().ends_with("+loop\n"));

        let m = machine("begin 1 until");
        assert_eq!("begin\n  1\nuntil\n", m.decompiled());

        let m = machine("begin 1 while 2 repeat");
        assert_eq!("begin\n  1\nwhile\n  2\nrepeat\n", m.decompiled());
    }

    #[test]
    fn test_nested_indentation() {
        let m = machine("1 if 2 if 3 then then");
        assert_eq!("1\nif\n  2\n  if\n    3\n  then\nthen\n", m.decompiled());
    }

    #[test]
    fn test_read_words() {
        let m = machine("input src output dst float64 src i-> stack 4 src #!q-> dst");
        let text = m.decompiled();
        assert!(text.contains("src i-> stack\n"));
        assert!(text.contains("src #!q-> dst\n"));
    }

    #[test]
    fn test_literal_that_matches_loop_opcodes() {
        // 7, 8, and 9 collide with the AGAIN/UNTIL/WHILE markers; the walker
        // must not mistake a literal operand for a loop tail.
        let m = machine("7 8 9");
        assert_eq!("7\n8\n9\n", m.decompiled());
    }

    #[test]
    fn test_round_trip() {
        let src = "variable n\ninput src\noutput dst int32\n\
                   : twice dup + ;\n\
                   5 n !\n\
                   10 0 do i twice dst <- stack loop\n\
                   1 if src i-> stack else 0 then\n\
                   begin n @ 1 - n ! n @ 0= until";
        let m = machine(src);
        let text = m.decompiled();
        let m2 = machine(&text);
        assert_eq!(m.bytecodes(), m2.bytecodes());
        assert_eq!(m.bytecode_offsets(), m2.bytecode_offsets());
        assert_eq!(text, m2.decompiled());
    }

    #[test]
    fn test_current_instruction() {
        let mut m = machine("42 pause drop");
        assert_eq!(None, m.current_instruction());
        m.begin(Inputs::new()).unwrap();
        assert_eq!(Some("42".to_string()), m.current_instruction());
        m.resume().unwrap();
        assert_eq!(Some("drop".to_string()), m.current_instruction());
        m.resume().unwrap();
        assert_eq!(None, m.current_instruction());
    }

    #[test]
    fn test_exit_and_halt_render() {
        let m = machine(": f exit ; halt");
        let text = m.decompiled();
        assert!(text.contains("  exit\n"));
        assert!(text.ends_with("halt\n"));
    }
}
