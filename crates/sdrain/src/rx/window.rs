//! Rolling text window for regex scanning

use regex::bytes::Regex;
use thiserror::Error;

/// The window is full; [`TextWindow::shift`] before writing again
#[derive(Error, Clone, Copy, Debug, PartialEq, Eq)]
#[error("text window is full, use shift() before writing again")]
pub struct WindowFull;

/// A rolling window over the most recent decoded text
///
/// Two half-buffers of capacity `window_size` alternate: the current one
/// accumulates written bytes; when it is full, the second half of its
/// content moves into the other buffer, which becomes current. This keeps
/// roughly `window_size` bytes of context searchable across the shift
/// boundary.
///
/// A search cursor advances on every successful match so the same text is
/// not reported twice; [`shift`](TextWindow::shift) translates it into the
/// new buffer's coordinate space.
#[derive(Clone, Debug)]
pub struct TextWindow {
    window: [Vec<u8>; 2],
    window_size: usize,
    current: usize,
    search_point: usize,
}

impl TextWindow {
    pub fn new(window_size: usize) -> Self {
        Self {
            window: [
                Vec::with_capacity(window_size),
                Vec::with_capacity(window_size),
            ],
            window_size,
            current: 0,
            search_point: 0,
        }
    }

    /// Current window content
    pub fn as_bytes(&self) -> &[u8] {
        &self.window[self.current]
    }

    pub fn reset(&mut self) {
        self.window[0].clear();
        self.window[1].clear();
        self.current = 0;
        self.search_point = 0;
    }

    /// Append bytes to the current buffer
    ///
    /// Accepts at most the remaining capacity and returns the number of
    /// bytes taken. Writing to a full window is an error.
    pub fn write(&mut self, bytes: &[u8]) -> Result<usize, WindowFull> {
        let append_len = usize::min(bytes.len(), self.window_size - self.window[self.current].len());
        if !bytes.is_empty() && append_len == 0 {
            return Err(WindowFull);
        }

        self.window[self.current].extend_from_slice(&bytes[..append_len]);
        Ok(append_len)
    }

    pub fn is_full(&self) -> bool {
        self.window[self.current].len() == self.window_size
    }

    /// Keep the second half of the current content, make the other buffer
    /// current
    pub fn shift(&mut self) {
        let other = (self.current + 1) % 2;
        let half_size = self.window_size / 2;

        let current_len = self.window[self.current].len();
        let start_index = current_len.saturating_sub(half_size);
        let append_len = usize::min(half_size, current_len - start_index);

        let (kept, spare) = if self.current == 0 {
            let (a, b) = self.window.split_at_mut(1);
            (&a[0], &mut b[0])
        } else {
            let (a, b) = self.window.split_at_mut(1);
            (&b[0], &mut a[0])
        };
        spare.clear();
        spare.extend_from_slice(&kept[start_index..start_index + append_len]);

        self.current = other;
        self.search_point = self.search_point.saturating_sub(start_index);
    }

    /// Next regex match after the search cursor
    ///
    /// On a match, the cursor advances past it. With `include_tail` false,
    /// matches whose end touches the buffer end are rejected — the match
    /// might be truncated and show up completed after more text arrives.
    pub fn find_next(&mut self, exp: &Regex, include_tail: bool) -> Option<String> {
        let current = &self.window[self.current];
        if self.search_point >= current.len() {
            return None;
        }

        let search_text = &current[self.search_point..];
        let found = exp.find(search_text)?;
        if !include_tail && found.end() >= search_text.len() {
            return None;
        }

        self.search_point += found.end();

        Some(String::from_utf8_lossy(found.as_bytes()).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window_str(w: &TextWindow) -> String {
        String::from_utf8_lossy(w.as_bytes()).into_owned()
    }

    #[test]
    fn test_write() {
        struct TestCase {
            desc: &'static str,
            preset: &'static str,
            text: &'static str,
            expected: &'static str,
            expected_n: usize,
            invalid: bool,
        }
        let tt = [
            TestCase {
                desc: "empty at start",
                preset: "",
                text: "",
                expected: "",
                expected_n: 0,
                invalid: false,
            },
            TestCase {
                desc: "append text",
                preset: "",
                text: "abc",
                expected: "abc",
                expected_n: 3,
                invalid: false,
            },
            TestCase {
                desc: "append text to existing",
                preset: "123",
                text: "abc",
                expected: "123abc",
                expected_n: 3,
                invalid: false,
            },
            TestCase {
                desc: "fill only current window",
                preset: "1234567",
                text: "abcdef",
                expected: "1234567abc",
                expected_n: 3,
                invalid: false,
            },
            TestCase {
                desc: "error when window is already full",
                preset: "1234567890",
                text: "abcdef",
                expected: "1234567890",
                expected_n: 0,
                invalid: true,
            },
        ];
        for tc in tt {
            let mut w = TextWindow::new(10);
            w.write(tc.preset.as_bytes()).unwrap();

            let result = w.write(tc.text.as_bytes());

            if tc.invalid {
                assert!(result.is_err(), "{}", tc.desc);
            } else {
                assert_eq!(result.unwrap(), tc.expected_n, "{}", tc.desc);
            }
            assert_eq!(window_str(&w), tc.expected, "{}", tc.desc);
        }
    }

    #[test]
    fn test_shift() {
        let mut w = TextWindow::new(10);

        w.shift();
        assert_eq!(w.current, 1);
        assert_eq!(window_str(&w), "");

        w.write(b"1234").unwrap();
        w.shift();
        assert_eq!(w.current, 0);
        assert_eq!(window_str(&w), "1234");

        w.write(b"123456").unwrap();
        w.shift();
        assert_eq!(w.current, 1);
        assert_eq!(window_str(&w), "23456");

        w.write(b"abcdefg").unwrap();
        w.shift();
        assert_eq!(w.current, 0);
        assert_eq!(window_str(&w), "abcde");

        w.write(b"fg").unwrap();
        w.shift();
        assert_eq!(w.current, 1);
        assert_eq!(window_str(&w), "cdefg");

        w.reset();
        assert_eq!(w.current, 0);
        assert_eq!(window_str(&w), "");
    }

    #[test]
    fn test_find_next() {
        let mut w = TextWindow::new(10);
        let a_exp = Regex::new("a").unwrap();

        assert_eq!(w.find_next(&a_exp, true), None);
        assert_eq!(w.search_point, 0);

        w.write(b"abc").unwrap();
        assert!(w.find_next(&a_exp, true).is_some());
        assert_eq!(w.search_point, 1);

        assert_eq!(w.find_next(&a_exp, true), None);
        assert_eq!(w.search_point, 1);

        w.write(b"1234567").unwrap();
        w.shift();
        assert_eq!(w.search_point, 0);
        assert_eq!(window_str(&w), "34567");

        w.write(b"abc").unwrap();
        assert!(w.find_next(&a_exp, true).is_some());
        assert_eq!(w.search_point, 6);

        w.shift();
        assert_eq!(w.search_point, 3);
        assert_eq!(window_str(&w), "67abc");
    }

    #[test]
    fn test_find_next_include_tail() {
        let mut w = TextWindow::new(10);
        let abc_exp = Regex::new("abc").unwrap();

        w.write(b"12345abc").unwrap();
        assert_eq!(w.find_next(&abc_exp, false), None);
        assert_eq!(w.find_next(&abc_exp, true).as_deref(), Some("abc"));
    }
}
