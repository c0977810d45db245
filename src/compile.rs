use arcstr::{ArcStr, Substr};

use crate::cell::Cell;
use crate::error::ParseError;
use crate::lex::{tokenize, Token};
use crate::opcodes::*;
use crate::output::Dtype;

/// Everything the compiler produces: flat bytecodes, segment offsets, and
/// the four symbol tables. Segment 0 is the top-level program; further
/// segments are word bodies and structured-control bodies in allocation
/// order.
#[derive(Debug)]
pub(crate) struct Program<T> {
    pub bytecodes: Vec<T>,
    pub offsets: Vec<usize>,
    pub variable_names: Vec<Substr>,
    pub input_names: Vec<Substr>,
    pub output_names: Vec<Substr>,
    pub output_dtypes: Vec<Dtype>,
    pub dictionary_names: Vec<Substr>,
    pub dictionary_codes: Vec<i64>,
}

pub(crate) fn compile<T: Cell>(source: &ArcStr) -> Result<Program<T>, ParseError> {
    let tokens = tokenize(source);
    let mut c = Compiler {
        source,
        tokens: &tokens,
        segments: vec![Vec::new()],
        variable_names: Vec::new(),
        input_names: Vec::new(),
        output_names: Vec::new(),
        output_dtypes: Vec::new(),
        dictionary_names: Vec::new(),
        dictionary_codes: Vec::new(),
    };
    let top = c.parse_block("", 0, tokens.len(), 0, 0)?;
    c.segments[0] = top;
    Ok(c.finish())
}

/// Accept decimal and `0x` hexadecimal integer literals. The whole token
/// must parse; hex digits wrap into the signed range.
pub(crate) fn parse_int(word: &str) -> Option<i64> {
    match word.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16).ok().map(|v| v as i64),
        None => word.parse::<i64>().ok(),
    }
}

struct Compiler<'a, T: Cell> {
    source: &'a ArcStr,
    tokens: &'a [Token],
    segments: Vec<Vec<T>>,
    variable_names: Vec<Substr>,
    input_names: Vec<Substr>,
    output_names: Vec<Substr>,
    output_dtypes: Vec<Dtype>,
    dictionary_names: Vec<Substr>,
    dictionary_codes: Vec<i64>,
}

fn emit<T: Cell>(code: &mut Vec<T>, v: i64) {
    code.push(T::from_i64(v));
}

impl<'a, T: Cell> Compiler<'a, T> {
    fn finish(self) -> Program<T> {
        let mut bytecodes = Vec::new();
        let mut offsets = vec![0];
        for segment in &self.segments {
            bytecodes.extend_from_slice(segment);
            offsets.push(bytecodes.len());
        }
        Program {
            bytecodes,
            offsets,
            variable_names: self.variable_names,
            input_names: self.input_names,
            output_names: self.output_names,
            output_dtypes: self.output_dtypes,
            dictionary_names: self.dictionary_names,
            dictionary_codes: self.dictionary_codes,
        }
    }

    /// Error annotated with the source text spanned by tokens
    /// `[start, stop)`.
    fn err(&self, start: usize, stop: usize, msg: &'static str) -> ParseError {
        let tok = match self.tokens.get(start) {
            Some(t) => t,
            None => {
                return ParseError { line: 0, col: 0, snippet: String::new(), msg };
            }
        };
        let begin = tok.text.range().start;
        let end = match self.tokens.get(stop) {
            Some(t) => t.text.range().start,
            None => self.source.len(),
        };
        ParseError {
            line: tok.line,
            col: tok.col,
            snippet: self.source[begin..end].trim_end().to_string(),
            msg,
        }
    }

    fn name_collision(&self, name: &str) -> bool {
        self.variable_names.iter().any(|n| n.as_str() == name)
            || self.input_names.iter().any(|n| n.as_str() == name)
            || self.output_names.iter().any(|n| n.as_str() == name)
            || self.dictionary_names.iter().any(|n| n.as_str() == name)
            || is_reserved(name)
            || parse_int(name).is_some()
    }

    fn claim_name(&self, pos: usize, name: &str) -> Result<(), ParseError> {
        if self.name_collision(name) {
            Err(self.err(
                pos,
                pos + 2,
                "variable, input, output, and word names must be unique \
                 and not reserved words or integers",
            ))
        } else {
            Ok(())
        }
    }

    /// Parse `[start, stop)` into a freshly allocated segment and return its
    /// reference bytecode.
    fn subsegment(
        &mut self,
        defn: &str,
        start: usize,
        stop: usize,
        exitdepth: i64,
        dodepth: i64,
    ) -> Result<i64, ParseError> {
        let slot = self.segments.len();
        self.segments.push(Vec::new());
        let body = self.parse_block(defn, start, stop, exitdepth, dodepth)?;
        self.segments[slot] = body;
        Ok(BOUND_DICTIONARY + slot as i64)
    }

    fn parse_block(
        &mut self,
        defn: &str,
        start: usize,
        stop: usize,
        exitdepth: i64,
        dodepth: i64,
    ) -> Result<Vec<T>, ParseError> {
        let toks = self.tokens;
        let mut code: Vec<T> = Vec::new();
        let mut pos = start;
        while pos < stop {
            let word = toks[pos].text.as_str();

            if word == "(" {
                // Parenthesized comment; parens in the text must balance.
                let mut substop = pos;
                let mut nesting = 1;
                while nesting > 0 {
                    substop += 1;
                    if substop >= stop {
                        return Err(self.err(pos, substop, "'(' is missing its closing ')'"));
                    }
                    match toks[substop].text.as_str() {
                        "(" => nesting += 1,
                        ")" => nesting -= 1,
                        _ => (),
                    }
                }
                pos = substop + 1;
            } else if word == "\\" {
                // Comment to end of line.
                let mut substop = pos;
                while substop < stop && !toks[substop].is("\n") {
                    substop += 1;
                }
                pos = substop + 1;
            } else if word == "\n" || word.is_empty() {
                pos += 1;
            } else if word == ":" {
                if pos + 1 >= stop || toks[pos + 1].is(";") {
                    return Err(self.err(pos, pos + 2, "missing name in word definition"));
                }
                let name = toks[pos + 1].text.clone();
                self.claim_name(pos, name.as_str())?;
                let substart = pos + 2;
                let mut substop = pos + 1;
                let mut nesting = 1;
                while nesting > 0 {
                    substop += 1;
                    if substop >= stop {
                        return Err(self.err(pos, stop, "definition is missing its closing ';'"));
                    }
                    match toks[substop].text.as_str() {
                        ":" => nesting += 1,
                        ";" => nesting -= 1,
                        _ => (),
                    }
                }
                // Register the word before parsing its body so that
                // recursive references resolve.
                let slot = self.segments.len();
                self.dictionary_names.push(name.clone());
                self.dictionary_codes.push(BOUND_DICTIONARY + slot as i64);
                self.segments.push(Vec::new());
                let body = self.parse_block(name.as_str(), substart, substop, 0, 0)?;
                self.segments[slot] = body;
                pos = substop + 1;
            } else if word == "recurse" {
                if defn.is_empty() {
                    return Err(self.err(
                        pos,
                        pos + 1,
                        "only allowed in a ': name ... ;' definition",
                    ));
                }
                if let Some(i) = self.dictionary_names.iter().position(|n| n.as_str() == defn) {
                    emit(&mut code, self.dictionary_codes[i]);
                }
                pos += 1;
            } else if word == "variable" {
                if pos + 1 >= stop {
                    return Err(self.err(pos, pos + 2, "missing name in variable declaration"));
                }
                let name = toks[pos + 1].text.clone();
                self.claim_name(pos, name.as_str())?;
                self.variable_names.push(name);
                pos += 2;
            } else if word == "input" {
                if pos + 1 >= stop {
                    return Err(self.err(pos, pos + 2, "missing name in input declaration"));
                }
                let name = toks[pos + 1].text.clone();
                self.claim_name(pos, name.as_str())?;
                self.input_names.push(name);
                pos += 2;
            } else if word == "output" {
                if pos + 2 >= stop {
                    return Err(self.err(
                        pos,
                        pos + 3,
                        "missing name or dtype in output declaration",
                    ));
                }
                let name = toks[pos + 1].text.clone();
                self.claim_name(pos, name.as_str())?;
                let dtype = match Dtype::parse(toks[pos + 2].text.as_str()) {
                    Some(d) => d,
                    None => return Err(self.err(pos, pos + 3, "output dtype not recognized")),
                };
                self.output_names.push(name);
                self.output_dtypes.push(dtype);
                pos += 3;
            } else if word == "halt" {
                emit(&mut code, CODE_HALT);
                pos += 1;
            } else if word == "pause" {
                emit(&mut code, CODE_PAUSE);
                pos += 1;
            } else if word == "if" {
                let substart = pos + 1;
                let mut subelse = None;
                let mut substop = pos;
                let mut nesting = 1;
                while nesting > 0 {
                    substop += 1;
                    if substop >= stop {
                        return Err(self.err(pos, stop, "'if' is missing its closing 'then'"));
                    }
                    match toks[substop].text.as_str() {
                        "if" => nesting += 1,
                        "then" => nesting -= 1,
                        "else" if nesting == 1 => subelse = Some(substop),
                        _ => (),
                    }
                }
                match subelse {
                    None => {
                        let body =
                            self.subsegment(defn, substart, substop, exitdepth + 1, dodepth)?;
                        emit(&mut code, CODE_IF);
                        emit(&mut code, body);
                    }
                    Some(at) => {
                        let consequent =
                            self.subsegment(defn, substart, at, exitdepth + 1, dodepth)?;
                        let alternate =
                            self.subsegment(defn, at + 1, substop, exitdepth + 1, dodepth)?;
                        emit(&mut code, CODE_IF_ELSE);
                        emit(&mut code, consequent);
                        emit(&mut code, alternate);
                    }
                }
                pos = substop + 1;
            } else if word == "do" {
                let substart = pos + 1;
                let mut substop = pos;
                let mut is_step = false;
                let mut nesting = 1;
                while nesting > 0 {
                    substop += 1;
                    if substop >= stop {
                        return Err(self.err(pos, stop, "'do' is missing its closing 'loop'"));
                    }
                    match toks[substop].text.as_str() {
                        "do" => nesting += 1,
                        "loop" => nesting -= 1,
                        "+loop" => {
                            if nesting == 1 {
                                is_step = true;
                            }
                            nesting -= 1;
                        }
                        _ => (),
                    }
                }
                let body = self.subsegment(defn, substart, substop, exitdepth + 1, dodepth + 1)?;
                emit(&mut code, if is_step { CODE_DO_STEP } else { CODE_DO });
                emit(&mut code, body);
                pos = substop + 1;
            } else if word == "begin" {
                let substart = pos + 1;
                let mut substop = pos;
                let mut is_again = false;
                let mut subwhile = None;
                let mut nesting = 1;
                while nesting > 0 {
                    substop += 1;
                    if substop >= stop {
                        return Err(self.err(
                            pos,
                            stop,
                            "'begin' is missing its closing 'until' or 'while ... repeat'",
                        ));
                    }
                    match toks[substop].text.as_str() {
                        "begin" => nesting += 1,
                        "until" => nesting -= 1,
                        "again" => {
                            if nesting == 1 {
                                is_again = true;
                            }
                            nesting -= 1;
                        }
                        "while" => {
                            if nesting == 1 {
                                subwhile = Some(substop);
                            }
                            nesting -= 1;
                            let mut subnesting = 1;
                            while subnesting > 0 {
                                substop += 1;
                                if substop >= stop {
                                    return Err(self.err(
                                        pos,
                                        stop,
                                        "'while' is missing its closing 'repeat'",
                                    ));
                                }
                                match toks[substop].text.as_str() {
                                    "while" => subnesting += 1,
                                    "repeat" => subnesting -= 1,
                                    _ => (),
                                }
                            }
                        }
                        _ => (),
                    }
                }
                if is_again {
                    let body = self.subsegment(defn, substart, substop, exitdepth + 1, dodepth)?;
                    emit(&mut code, body);
                    emit(&mut code, CODE_AGAIN);
                } else if let Some(at) = subwhile {
                    let precondition =
                        self.subsegment(defn, substart, at, exitdepth + 1, dodepth)?;
                    let postcondition =
                        self.subsegment(defn, at + 1, substop, exitdepth + 1, dodepth)?;
                    emit(&mut code, precondition);
                    emit(&mut code, CODE_WHILE);
                    emit(&mut code, postcondition);
                } else {
                    let body = self.subsegment(defn, substart, substop, exitdepth + 1, dodepth)?;
                    emit(&mut code, body);
                    emit(&mut code, CODE_UNTIL);
                }
                pos = substop + 1;
            } else if word == "exit" {
                emit(&mut code, CODE_EXIT);
                emit(&mut code, exitdepth);
                pos += 1;
            } else if let Some(index) = self.variable_names.iter().position(|n| n.as_str() == word)
            {
                let next = if pos + 1 < stop { toks[pos + 1].text.as_str() } else { "" };
                let op = match next {
                    "!" => CODE_PUT,
                    "+!" => CODE_INC,
                    "@" => CODE_GET,
                    _ => {
                        return Err(self.err(
                            pos,
                            pos + 2,
                            "missing '!', '+!', or '@' after variable name",
                        ))
                    }
                };
                emit(&mut code, op);
                emit(&mut code, index as i64);
                pos += 2;
            } else if let Some(index) = self.input_names.iter().position(|n| n.as_str() == word) {
                let next = if pos + 1 < stop { toks[pos + 1].text.as_str() } else { "" };
                match next {
                    "len" | "pos" | "end" | "seek" | "skip" => {
                        let op = match next {
                            "len" => CODE_LEN_INPUT,
                            "pos" => CODE_POS,
                            "end" => CODE_END,
                            "seek" => CODE_SEEK,
                            _ => CODE_SKIP,
                        };
                        emit(&mut code, op);
                        emit(&mut code, index as i64);
                        pos += 2;
                    }
                    _ => match parse_read_word(next) {
                        Some((repeated, big, kind)) => {
                            let mut bits = kind.code();
                            if repeated {
                                bits |= READ_REPEATED;
                            }
                            if big {
                                bits |= READ_BIGENDIAN;
                            }
                            let target =
                                if pos + 2 < stop { toks[pos + 2].text.as_str() } else { "" };
                            let out_index = if target == "stack" {
                                None
                            } else {
                                match self.output_names.iter().position(|n| n.as_str() == target)
                                {
                                    Some(i) => {
                                        bits |= READ_DIRECT;
                                        Some(i)
                                    }
                                    None => {
                                        return Err(self.err(
                                            pos,
                                            pos + 3,
                                            "missing 'stack' or an output name after '->'",
                                        ))
                                    }
                                }
                            };
                            // Bit-flipped so the sign bit marks typed I/O.
                            emit(&mut code, !bits);
                            emit(&mut code, index as i64);
                            if let Some(i) = out_index {
                                emit(&mut code, i as i64);
                            }
                            pos += 3;
                        }
                        None => {
                            return Err(self.err(
                                pos,
                                pos + 3,
                                "missing '*-> stack/output', 'seek', 'skip', 'end', 'pos', \
                                 or 'len' after input name",
                            ))
                        }
                    },
                }
            } else if let Some(index) = self.output_names.iter().position(|n| n.as_str() == word) {
                let next = if pos + 1 < stop { toks[pos + 1].text.as_str() } else { "" };
                match next {
                    "<-" => {
                        let target = if pos + 2 < stop { toks[pos + 2].text.as_str() } else { "" };
                        if target != "stack" {
                            return Err(self.err(pos, pos + 3, "missing 'stack' after '<-'"));
                        }
                        emit(&mut code, CODE_WRITE);
                        emit(&mut code, index as i64);
                        pos += 3;
                    }
                    "len" => {
                        emit(&mut code, CODE_LEN_OUTPUT);
                        emit(&mut code, index as i64);
                        pos += 2;
                    }
                    "rewind" => {
                        emit(&mut code, CODE_REWIND);
                        emit(&mut code, index as i64);
                        pos += 2;
                    }
                    _ => {
                        return Err(self.err(
                            pos,
                            pos + 2,
                            "missing '<- stack', 'len', or 'rewind' after output name",
                        ))
                    }
                }
            } else if let Some(op) = builtin(word) {
                if word == "i" && dodepth < 1 {
                    return Err(self.err(pos, pos + 1, "only allowed in a 'do' loop"));
                }
                if word == "j" && dodepth < 2 {
                    return Err(self.err(pos, pos + 1, "only allowed in a nested 'do' loop"));
                }
                if word == "k" && dodepth < 3 {
                    return Err(self.err(pos, pos + 1, "only allowed in a doubly nested 'do' loop"));
                }
                emit(&mut code, op);
                pos += 1;
            } else if let Some(i) = self.dictionary_names.iter().position(|n| n.as_str() == word) {
                emit(&mut code, self.dictionary_codes[i]);
                pos += 1;
            } else if let Some(num) = parse_int(word) {
                emit(&mut code, CODE_LITERAL);
                emit(&mut code, num);
                pos += 1;
            } else {
                return Err(self.err(pos, pos + 1, "unrecognized word or wrong context for word"));
            }
        }
        Ok(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compiled(src: &str) -> Program<i64> {
        compile(&ArcStr::from(src)).unwrap()
    }

    fn compile_err(src: &str) -> ParseError {
        compile::<i64>(&ArcStr::from(src)).unwrap_err()
    }

    fn segment<'a>(p: &'a Program<i64>, k: usize) -> &'a [i64] {
        &p.bytecodes[p.offsets[k]..p.offsets[k + 1]]
    }

    #[test]
    fn test_literals_and_builtins() {
        let p = compiled("2 3 + 0x10 xor");
        assert_eq!(
            vec![CODE_LITERAL, 2, CODE_LITERAL, 3, CODE_ADD, CODE_LITERAL, 16, CODE_XOR],
            segment(&p, 0)
        );
        assert_eq!(vec![0, 8], p.offsets);
    }

    #[test]
    fn test_parse_int() {
        assert_eq!(Some(123), parse_int("123"));
        assert_eq!(Some(-45), parse_int("-45"));
        assert_eq!(Some(255), parse_int("0xff"));
        assert_eq!(Some(-1), parse_int("0xffffffffffffffff"));
        assert_eq!(None, parse_int("123abc"));
        assert_eq!(None, parse_int("0x"));
        assert_eq!(None, parse_int("abc"));
    }

    #[test]
    fn test_comments() {
        let p = compiled("( a ( nested ) comment ) 1 \\ rest of line 2 3\n4");
        assert_eq!(
            vec![CODE_LITERAL, 1, CODE_LITERAL, 4],
            segment(&p, 0)
        );
        assert_eq!(
            "'(' is missing its closing ')'",
            compile_err("( never closed").msg
        );
    }

    #[test]
    fn test_word_definition() {
        let p = compiled(": double dup + ; 5 double");
        assert_eq!(vec!["double".to_string()], p.dictionary_names.iter().map(|n| n.to_string()).collect::<Vec<_>>());
        assert_eq!(vec![BOUND_DICTIONARY + 1], p.dictionary_codes);
        assert_eq!(vec![CODE_DUP, CODE_ADD], segment(&p, 1));
        assert_eq!(
            vec![CODE_LITERAL, 5, BOUND_DICTIONARY + 1],
            segment(&p, 0)
        );
    }

    #[test]
    fn test_recursion() {
        let p = compiled(": spin recurse ;");
        assert_eq!(vec![BOUND_DICTIONARY + 1], segment(&p, 1));
        assert_eq!(
            "only allowed in a ': name ... ;' definition",
            compile_err("recurse").msg
        );
    }

    #[test]
    fn test_if_layout() {
        let p = compiled("1 if 2 then");
        assert_eq!(
            vec![CODE_LITERAL, 1, CODE_IF, BOUND_DICTIONARY + 1],
            segment(&p, 0)
        );
        assert_eq!(vec![CODE_LITERAL, 2], segment(&p, 1));

        let p = compiled("1 if 2 else 3 then");
        assert_eq!(
            vec![CODE_LITERAL, 1, CODE_IF_ELSE, BOUND_DICTIONARY + 1, BOUND_DICTIONARY + 2],
            segment(&p, 0)
        );
        assert_eq!(vec![CODE_LITERAL, 2], segment(&p, 1));
        assert_eq!(vec![CODE_LITERAL, 3], segment(&p, 2));

        assert_eq!("'if' is missing its closing 'then'", compile_err("1 if 2").msg);
    }

    #[test]
    fn test_do_layout() {
        let p = compiled("10 0 do i loop");
        assert_eq!(
            vec![CODE_LITERAL, 10, CODE_LITERAL, 0, CODE_DO, BOUND_DICTIONARY + 1],
            segment(&p, 0)
        );
        assert_eq!(vec![CODE_I], segment(&p, 1));

        let p = compiled("10 0 do i 2 +loop");
        assert_eq!(CODE_DO_STEP, segment(&p, 0)[4]);

        assert_eq!("'do' is missing its closing 'loop'", compile_err("1 0 do").msg);
    }

    #[test]
    fn test_begin_layouts() {
        let p = compiled("begin 1 again");
        assert_eq!(vec![BOUND_DICTIONARY + 1, CODE_AGAIN], segment(&p, 0));

        let p = compiled("begin 1 until");
        assert_eq!(vec![BOUND_DICTIONARY + 1, CODE_UNTIL], segment(&p, 0));

        let p = compiled("begin 1 while 2 repeat");
        assert_eq!(
            vec![BOUND_DICTIONARY + 1, CODE_WHILE, BOUND_DICTIONARY + 2],
            segment(&p, 0)
        );
        assert_eq!(vec![CODE_LITERAL, 1], segment(&p, 1));
        assert_eq!(vec![CODE_LITERAL, 2], segment(&p, 2));

        assert_eq!(
            "'begin' is missing its closing 'until' or 'while ... repeat'",
            compile_err("begin 1").msg
        );
        assert_eq!(
            "'while' is missing its closing 'repeat'",
            compile_err("begin 1 while 2").msg
        );
    }

    #[test]
    fn test_nested_control() {
        // Inner bodies allocate segments before the outer emit refers to them.
        let p = compiled("1 if 2 if 3 then then");
        assert_eq!(vec![CODE_LITERAL, 1, CODE_IF, BOUND_DICTIONARY + 1], segment(&p, 0));
        assert_eq!(
            vec![CODE_LITERAL, 2, CODE_IF, BOUND_DICTIONARY + 2],
            segment(&p, 1)
        );
        assert_eq!(vec![CODE_LITERAL, 3], segment(&p, 2));
    }

    #[test]
    fn test_exit_depth() {
        let p = compiled(": f exit if exit then ;");
        assert_eq!(
            vec![CODE_EXIT, 0, CODE_IF, BOUND_DICTIONARY + 2],
            segment(&p, 1)
        );
        assert_eq!(vec![CODE_EXIT, 1], segment(&p, 2));
    }

    #[test]
    fn test_variables() {
        let p = compiled("variable x variable y 1 x ! x @ y +!");
        assert_eq!(2, p.variable_names.len());
        assert_eq!(
            vec![CODE_LITERAL, 1, CODE_PUT, 0, CODE_GET, 0, CODE_INC, 1],
            segment(&p, 0)
        );
        assert_eq!(
            "missing '!', '+!', or '@' after variable name",
            compile_err("variable x x").msg
        );
        assert_eq!(
            "missing name in variable declaration",
            compile_err("variable").msg
        );
    }

    #[test]
    fn test_input_words() {
        let p = compiled("input src src len src pos src end 0 src seek 4 src skip");
        assert_eq!(
            vec![
                CODE_LEN_INPUT, 0, CODE_POS, 0, CODE_END, 0,
                CODE_LITERAL, 0, CODE_SEEK, 0, CODE_LITERAL, 4, CODE_SKIP, 0,
            ],
            segment(&p, 0)
        );
    }

    #[test]
    fn test_read_words() {
        let p = compiled("input src output dst int32 src i-> stack src #!d-> dst");
        let bits_stack = ReadKind::Int32.code();
        let bits_direct = ReadKind::Float64.code() | READ_REPEATED | READ_BIGENDIAN | READ_DIRECT;
        assert_eq!(
            vec![!bits_stack, 0, !bits_direct, 0, 0],
            segment(&p, 0)
        );
        assert!(segment(&p, 0)[0] < 0);
        assert_eq!(
            "missing 'stack' or an output name after '->'",
            compile_err("input src src i-> elsewhere").msg
        );
        assert_eq!(
            "missing '*-> stack/output', 'seek', 'skip', 'end', 'pos', or 'len' after input name",
            compile_err("input src src").msg
        );
    }

    #[test]
    fn test_output_words() {
        let p = compiled("output dst int16 1 dst <- stack dst len dst rewind");
        assert_eq!(
            vec![
                CODE_LITERAL, 1, CODE_WRITE, 0, CODE_LEN_OUTPUT, 0, CODE_REWIND, 0,
            ],
            segment(&p, 0)
        );
        assert_eq!(vec![Dtype::Int16], p.output_dtypes);
        assert_eq!("output dtype not recognized", compile_err("output o int7").msg);
        assert_eq!(
            "missing '<- stack', 'len', or 'rewind' after output name",
            compile_err("output o bool o").msg
        );
        assert_eq!("missing 'stack' after '<-'", compile_err("output o bool o <- 5").msg);
    }

    #[test]
    fn test_name_collisions() {
        let dup = "variable, input, output, and word names must be unique \
                   and not reserved words or integers";
        assert_eq!(dup, compile_err("variable x variable x").msg);
        assert_eq!(dup, compile_err("variable x input x").msg);
        assert_eq!(dup, compile_err("input q : q ;").msg);
        assert_eq!(dup, compile_err("variable dup").msg);
        assert_eq!(dup, compile_err("variable begin").msg);
        assert_eq!(dup, compile_err("variable 123").msg);
        assert_eq!(dup, compile_err("variable 0xff").msg);
        assert_eq!(dup, compile_err(": int32 ;").msg);
    }

    #[test]
    fn test_loop_counter_context() {
        assert_eq!("only allowed in a 'do' loop", compile_err("i").msg);
        assert_eq!(
            "only allowed in a nested 'do' loop",
            compile_err("1 0 do j loop").msg
        );
        assert_eq!(
            "only allowed in a doubly nested 'do' loop",
            compile_err("1 0 do 1 0 do k loop loop").msg
        );
        // Counters survive an 'if' but not a word boundary.
        compiled("1 0 do 1 if i then loop");
        assert_eq!("only allowed in a 'do' loop", compile_err(": f i ; 1 0 do f loop").msg);
    }

    #[test]
    fn test_unrecognized() {
        let e = compile_err("1 2\nbogus");
        assert_eq!("unrecognized word or wrong context for word", e.msg);
        assert_eq!((2, 0), (e.line, e.col));
        assert_eq!("bogus", e.snippet);
    }

    #[test]
    fn test_missing_semicolon() {
        assert_eq!("definition is missing its closing ';'", compile_err(": f 1 2").msg);
        assert_eq!("missing name in word definition", compile_err(": ;").msg);
    }

    #[test]
    fn test_offsets_invariant() {
        let p = compiled(": a 1 ; : b a a ; b 2 if b then");
        assert_eq!(0, p.offsets[0]);
        assert_eq!(p.bytecodes.len(), *p.offsets.last().unwrap());
        assert!(p.offsets.windows(2).all(|w| w[0] <= w[1]));
        for &b in &p.bytecodes {
            if b >= BOUND_DICTIONARY {
                assert!(((b - BOUND_DICTIONARY) as usize) < p.offsets.len() - 1);
            }
        }
    }
}
