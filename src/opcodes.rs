use crate::output::{Dtype, Scalar};
use std::mem;

// Typed-I/O opcodes pack three flag bits and a type selector, then take the
// bitwise complement so the sign bit alone separates reads from everything
// else in the bytecode stream.
pub const READ_DIRECT: i64 = 0x1;
pub const READ_REPEATED: i64 = 0x2;
pub const READ_BIGENDIAN: i64 = 0x4;
pub const READ_MASK: i64 = 0x78;

// Instructions emitted by special parsing rules.
pub const CODE_LITERAL: i64 = 0;
pub const CODE_HALT: i64 = 1;
pub const CODE_PAUSE: i64 = 2;
pub const CODE_IF: i64 = 3;
pub const CODE_IF_ELSE: i64 = 4;
pub const CODE_DO: i64 = 5;
pub const CODE_DO_STEP: i64 = 6;
pub const CODE_AGAIN: i64 = 7;
pub const CODE_UNTIL: i64 = 8;
pub const CODE_WHILE: i64 = 9;
pub const CODE_EXIT: i64 = 10;
pub const CODE_PUT: i64 = 11;
pub const CODE_INC: i64 = 12;
pub const CODE_GET: i64 = 13;
pub const CODE_LEN_INPUT: i64 = 14;
pub const CODE_POS: i64 = 15;
pub const CODE_END: i64 = 16;
pub const CODE_SEEK: i64 = 17;
pub const CODE_SKIP: i64 = 18;
pub const CODE_WRITE: i64 = 19;
pub const CODE_LEN_OUTPUT: i64 = 20;
pub const CODE_REWIND: i64 = 21;
// Generic builtin instructions.
pub const CODE_I: i64 = 22;
pub const CODE_J: i64 = 23;
pub const CODE_K: i64 = 24;
pub const CODE_DUP: i64 = 25;
pub const CODE_DROP: i64 = 26;
pub const CODE_SWAP: i64 = 27;
pub const CODE_OVER: i64 = 28;
pub const CODE_ROT: i64 = 29;
pub const CODE_NIP: i64 = 30;
pub const CODE_TUCK: i64 = 31;
pub const CODE_ADD: i64 = 32;
pub const CODE_SUB: i64 = 33;
pub const CODE_MUL: i64 = 34;
pub const CODE_DIV: i64 = 35;
pub const CODE_MOD: i64 = 36;
pub const CODE_DIVMOD: i64 = 37;
pub const CODE_NEGATE: i64 = 38;
pub const CODE_ADD1: i64 = 39;
pub const CODE_SUB1: i64 = 40;
pub const CODE_ABS: i64 = 41;
pub const CODE_MIN: i64 = 42;
pub const CODE_MAX: i64 = 43;
pub const CODE_EQ: i64 = 44;
pub const CODE_NE: i64 = 45;
pub const CODE_GT: i64 = 46;
pub const CODE_GE: i64 = 47;
pub const CODE_LT: i64 = 48;
pub const CODE_LE: i64 = 49;
pub const CODE_EQ0: i64 = 50;
pub const CODE_INVERT: i64 = 51;
pub const CODE_AND: i64 = 52;
pub const CODE_OR: i64 = 53;
pub const CODE_XOR: i64 = 54;
pub const CODE_LSHIFT: i64 = 55;
pub const CODE_RSHIFT: i64 = 56;
pub const CODE_FALSE: i64 = 57;
pub const CODE_TRUE: i64 = 58;
// Values at or above this point reference bytecode segments.
pub const BOUND_DICTIONARY: i64 = 59;

pub const RESERVED_WORDS: &[&str] = &[
    "(", ")", "\\", "\n", "",
    ":", ";", "recurse",
    "variable", "input", "output",
    "halt", "pause",
    "if", "then", "else",
    "do", "loop", "+loop",
    "begin", "again", "until", "while", "repeat",
    "exit",
    "!", "+!", "@",
    "len", "pos", "end", "seek", "skip",
    "<-", "stack", "rewind",
];

pub fn builtin(word: &str) -> Option<i64> {
    let code = match word {
        "i" => CODE_I,
        "j" => CODE_J,
        "k" => CODE_K,
        "dup" => CODE_DUP,
        "drop" => CODE_DROP,
        "swap" => CODE_SWAP,
        "over" => CODE_OVER,
        "rot" => CODE_ROT,
        "nip" => CODE_NIP,
        "tuck" => CODE_TUCK,
        "+" => CODE_ADD,
        "-" => CODE_SUB,
        "*" => CODE_MUL,
        "/" => CODE_DIV,
        "mod" => CODE_MOD,
        "/mod" => CODE_DIVMOD,
        "negate" => CODE_NEGATE,
        "1+" => CODE_ADD1,
        "1-" => CODE_SUB1,
        "abs" => CODE_ABS,
        "min" => CODE_MIN,
        "max" => CODE_MAX,
        "=" => CODE_EQ,
        "<>" => CODE_NE,
        ">" => CODE_GT,
        ">=" => CODE_GE,
        "<" => CODE_LT,
        "<=" => CODE_LE,
        "0=" => CODE_EQ0,
        "invert" => CODE_INVERT,
        "and" => CODE_AND,
        "or" => CODE_OR,
        "xor" => CODE_XOR,
        "lshift" => CODE_LSHIFT,
        "rshift" => CODE_RSHIFT,
        "false" => CODE_FALSE,
        "true" => CODE_TRUE,
        _ => return None,
    };
    Some(code)
}

pub fn builtin_name(code: i64) -> Option<&'static str> {
    let name = match code {
        CODE_I => "i",
        CODE_J => "j",
        CODE_K => "k",
        CODE_DUP => "dup",
        CODE_DROP => "drop",
        CODE_SWAP => "swap",
        CODE_OVER => "over",
        CODE_ROT => "rot",
        CODE_NIP => "nip",
        CODE_TUCK => "tuck",
        CODE_ADD => "+",
        CODE_SUB => "-",
        CODE_MUL => "*",
        CODE_DIV => "/",
        CODE_MOD => "mod",
        CODE_DIVMOD => "/mod",
        CODE_NEGATE => "negate",
        CODE_ADD1 => "1+",
        CODE_SUB1 => "1-",
        CODE_ABS => "abs",
        CODE_MIN => "min",
        CODE_MAX => "max",
        CODE_EQ => "=",
        CODE_NE => "<>",
        CODE_GT => ">",
        CODE_GE => ">=",
        CODE_LT => "<",
        CODE_LE => "<=",
        CODE_EQ0 => "0=",
        CODE_INVERT => "invert",
        CODE_AND => "and",
        CODE_OR => "or",
        CODE_XOR => "xor",
        CODE_LSHIFT => "lshift",
        CODE_RSHIFT => "rshift",
        CODE_FALSE => "false",
        CODE_TRUE => "true",
        _ => return None,
    };
    Some(name)
}

/// Element type of a typed read. `Intp`/`Uintp` are the native pointer-sized
/// integers (`n`/`N` in source).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadKind {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Intp,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Uintp,
    Float32,
    Float64,
}

impl ReadKind {
    pub fn from_letter(c: char) -> Option<ReadKind> {
        let kind = match c {
            '?' => ReadKind::Bool,
            'b' => ReadKind::Int8,
            'h' => ReadKind::Int16,
            'i' => ReadKind::Int32,
            'q' => ReadKind::Int64,
            'n' => ReadKind::Intp,
            'B' => ReadKind::Uint8,
            'H' => ReadKind::Uint16,
            'I' => ReadKind::Uint32,
            'Q' => ReadKind::Uint64,
            'N' => ReadKind::Uintp,
            'f' => ReadKind::Float32,
            'd' => ReadKind::Float64,
            _ => return None,
        };
        Some(kind)
    }

    pub fn code(self) -> i64 {
        let k = match self {
            ReadKind::Bool => 1,
            ReadKind::Int8 => 2,
            ReadKind::Int16 => 3,
            ReadKind::Int32 => 4,
            ReadKind::Int64 => 5,
            ReadKind::Intp => 6,
            ReadKind::Uint8 => 7,
            ReadKind::Uint16 => 8,
            ReadKind::Uint32 => 9,
            ReadKind::Uint64 => 10,
            ReadKind::Uintp => 11,
            ReadKind::Float32 => 12,
            ReadKind::Float64 => 13,
        };
        0x8 * k
    }

    pub fn from_code(code: i64) -> Option<ReadKind> {
        let kind = match code / 0x8 {
            1 => ReadKind::Bool,
            2 => ReadKind::Int8,
            3 => ReadKind::Int16,
            4 => ReadKind::Int32,
            5 => ReadKind::Int64,
            6 => ReadKind::Intp,
            7 => ReadKind::Uint8,
            8 => ReadKind::Uint16,
            9 => ReadKind::Uint32,
            10 => ReadKind::Uint64,
            11 => ReadKind::Uintp,
            12 => ReadKind::Float32,
            13 => ReadKind::Float64,
            _ => return None,
        };
        Some(kind)
    }

    pub fn width(self) -> usize {
        match self {
            ReadKind::Bool | ReadKind::Int8 | ReadKind::Uint8 => 1,
            ReadKind::Int16 | ReadKind::Uint16 => 2,
            ReadKind::Int32 | ReadKind::Uint32 | ReadKind::Float32 => 4,
            ReadKind::Int64 | ReadKind::Uint64 | ReadKind::Float64 => 8,
            ReadKind::Intp | ReadKind::Uintp => mem::size_of::<usize>(),
        }
    }

    pub fn word(self) -> &'static str {
        match self {
            ReadKind::Bool => "?->",
            ReadKind::Int8 => "b->",
            ReadKind::Int16 => "h->",
            ReadKind::Int32 => "i->",
            ReadKind::Int64 => "q->",
            ReadKind::Intp => "n->",
            ReadKind::Uint8 => "B->",
            ReadKind::Uint16 => "H->",
            ReadKind::Uint32 => "I->",
            ReadKind::Uint64 => "Q->",
            ReadKind::Uintp => "N->",
            ReadKind::Float32 => "f->",
            ReadKind::Float64 => "d->",
        }
    }

    /// Decode one element from exactly `self.width()` bytes.
    pub fn decode(self, bytes: &[u8], big: bool) -> Scalar {
        match self {
            ReadKind::Bool => Scalar::Bool(bytes[0] != 0),
            ReadKind::Int8 | ReadKind::Int16 | ReadKind::Int32 | ReadKind::Int64
            | ReadKind::Intp => Scalar::Int(int_from(bytes, big)),
            ReadKind::Uint8 | ReadKind::Uint16 | ReadKind::Uint32 | ReadKind::Uint64
            | ReadKind::Uintp => Scalar::UInt(uint_from(bytes, big)),
            ReadKind::Float32 => Scalar::Float(f64::from(f32::from_bits(uint_from(bytes, big) as u32))),
            ReadKind::Float64 => Scalar::Float(f64::from_bits(uint_from(bytes, big))),
        }
    }
}

fn uint_from(bytes: &[u8], big: bool) -> u64 {
    let mut v = 0u64;
    if big {
        for &b in bytes {
            v = (v << 8) | u64::from(b);
        }
    } else {
        for &b in bytes.iter().rev() {
            v = (v << 8) | u64::from(b);
        }
    }
    v
}

fn int_from(bytes: &[u8], big: bool) -> i64 {
    let v = uint_from(bytes, big);
    let shift = 64 - 8 * bytes.len() as u32;
    ((v << shift) as i64) >> shift
}

/// A parser word has the shape `[#][!]<type letter>->`: `#` pops the item
/// count from the stack, `!` selects big-endian.
pub fn parse_read_word(word: &str) -> Option<(bool, bool, ReadKind)> {
    let mut rest = word;
    let repeated = match rest.strip_prefix('#') {
        Some(r) => {
            rest = r;
            true
        }
        None => false,
    };
    let big = match rest.strip_prefix('!') {
        Some(r) => {
            rest = r;
            true
        }
        None => false,
    };
    let mut chars = rest.chars();
    let kind = ReadKind::from_letter(chars.next()?)?;
    if chars.as_str() == "->" {
        Some((repeated, big, kind))
    } else {
        None
    }
}

pub fn is_reserved(word: &str) -> bool {
    RESERVED_WORDS.contains(&word)
        || builtin(word).is_some()
        || Dtype::parse(word).is_some()
        || parse_read_word(word).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_encoding_is_negative() {
        for kind in [ReadKind::Bool, ReadKind::Int32, ReadKind::Float64] {
            let bits = kind.code() | READ_DIRECT | READ_REPEATED | READ_BIGENDIAN;
            assert!(!bits < 0);
            assert_eq!(bits, !(!bits));
            assert_eq!(Some(kind), ReadKind::from_code(bits & READ_MASK));
        }
        assert_eq!(0x68, ReadKind::Float64.code());
        assert_eq!(0x68, ReadKind::Float64.code() & READ_MASK);
    }

    #[test]
    fn test_parse_read_word() {
        assert_eq!(Some((false, false, ReadKind::Int32)), parse_read_word("i->"));
        assert_eq!(Some((true, false, ReadKind::Uint16)), parse_read_word("#H->"));
        assert_eq!(Some((false, true, ReadKind::Int64)), parse_read_word("!q->"));
        assert_eq!(Some((true, true, ReadKind::Float64)), parse_read_word("#!d->"));
        assert_eq!(None, parse_read_word("x->"));
        assert_eq!(None, parse_read_word("i"));
        assert_eq!(None, parse_read_word("i->x"));
        assert_eq!(None, parse_read_word("#!"));
    }

    #[test]
    fn test_decode() {
        assert_eq!(Scalar::Int(-2), ReadKind::Int16.decode(&[0xfe, 0xff], false));
        assert_eq!(Scalar::Int(-2), ReadKind::Int16.decode(&[0xff, 0xfe], true));
        assert_eq!(Scalar::UInt(0xfffe), ReadKind::Uint16.decode(&[0xff, 0xfe], true));
        assert_eq!(Scalar::Bool(true), ReadKind::Bool.decode(&[5], false));
        assert_eq!(Scalar::Bool(false), ReadKind::Bool.decode(&[0], true));
        assert_eq!(
            Scalar::Float(1.5),
            ReadKind::Float32.decode(&1.5f32.to_le_bytes(), false)
        );
        assert_eq!(
            Scalar::Float(-2.25),
            ReadKind::Float64.decode(&(-2.25f64).to_be_bytes(), true)
        );
    }

    #[test]
    fn test_builtin_round_trip() {
        for word in ["dup", "/mod", "0=", "lshift", "true"] {
            let code = builtin(word).unwrap();
            assert_eq!(Some(word), builtin_name(code));
        }
        assert_eq!(None, builtin("bogus"));
        assert!((0..BOUND_DICTIONARY).contains(&builtin("true").unwrap()));
    }

    #[test]
    fn test_reserved() {
        assert!(is_reserved("begin"));
        assert!(is_reserved("<-"));
        assert!(is_reserved("int32"));
        assert!(is_reserved("#!d->"));
        assert!(is_reserved("+"));
        assert!(!is_reserved("payload"));
    }
}
