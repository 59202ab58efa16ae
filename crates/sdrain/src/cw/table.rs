//! The Morse symbol alphabet and code table

use std::collections::HashMap;

use arrayvec::ArrayVec;
use lazy_static::lazy_static;

/// Maximum number of symbols in one character
pub const MAX_SYMBOL_COUNT: usize = 8;

/// One Morse mark
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Symbol {
    Dit,
    Dah,
}

/// A bounded sequence of up to [`MAX_SYMBOL_COUNT`] symbols
///
/// An empty `CwChar` means "no character accumulated".
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct CwChar {
    symbols: ArrayVec<Symbol, MAX_SYMBOL_COUNT>,
}

impl CwChar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a symbol; returns false if the character is full
    pub fn push(&mut self, symbol: Symbol) -> bool {
        self.symbols.try_push(symbol).is_ok()
    }

    pub fn clear(&mut self) {
        self.symbols.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }
}

impl std::fmt::Display for CwChar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for s in &self.symbols {
            match s {
                Symbol::Dit => write!(f, ".")?,
                Symbol::Dah => write!(f, "-")?,
            }
        }
        Ok(())
    }
}

impl std::str::FromStr for CwChar {
    type Err = char;

    /// Parse from "dits and dashes" notation, e.g. `".-"` for `a`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut result = Self::new();
        for c in s.chars() {
            let symbol = match c {
                '.' => Symbol::Dit,
                '-' => Symbol::Dah,
                other => return Err(other),
            };
            result.push(symbol);
        }
        Ok(result)
    }
}

// The code table, ITU morse plus the umlauts and punctuation commonly heard
// on the bands. The eight-dit sequence is the error prosign.
#[rustfmt::skip]
const CODE: &[(char, &str)] = &[
    ('a', ".-"),     ('b', "-..."),   ('c', "-.-."),   ('d', "-.."),
    ('e', "."),      ('f', "..-."),   ('g', "--."),    ('h', "...."),
    ('i', ".."),     ('j', ".---"),   ('k', "-.-"),    ('l', ".-.."),
    ('m', "--"),     ('n', "-."),     ('o', "---"),    ('p', ".--."),
    ('q', "--.-"),   ('r', ".-."),    ('s', "..."),    ('t', "-"),
    ('u', "..-"),    ('v', "...-"),   ('w', ".--"),    ('x', "-..-"),
    ('y', "-.--"),   ('z', "--.."),
    ('0', "-----"),  ('1', ".----"),  ('2', "..---"),  ('3', "...--"),
    ('4', "....-"),  ('5', "....."),  ('6', "-...."),  ('7', "--..."),
    ('8', "---.."),  ('9', "----."),
    ('.', ".-.-.-"), (',', "--..--"), ('?', "..--.."), ('\'', ".----."),
    ('!', "-.-.--"), ('/', "-..-."),  ('(', "-.--."),  (')', "-.--.-"),
    ('&', ".-..."),  (':', "---..."), (';', "-.-.-."), ('=', "-...-"),
    ('+', ".-.-."),  ('-', "-....-"), ('_', "..--.-"), ('"', ".-..-."),
    ('@', ".--.-."),
    ('ä', ".-.-"),   ('ö', "---."),   ('ü', "..--"),
    ('§', "........"),
];

lazy_static! {
    static ref DECODE_TABLE: HashMap<CwChar, char> = CODE
        .iter()
        .map(|(text, code)| (code.parse().expect("valid code table entry"), *text))
        .collect();
}

/// The symbol-sequence → character table
pub fn decode_table() -> &'static HashMap<CwChar, char> {
    &DECODE_TABLE
}

/// All characters of the code table with their "dits and dashes" notation
pub fn code_entries() -> impl Iterator<Item = (char, &'static str)> {
    CODE.iter().copied()
}
