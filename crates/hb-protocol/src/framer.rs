//! Byte stream to logical line framing.
//!
//! Tolerates `\r`, `\n`, and `\r\n` line endings; empty segments are
//! dropped; an incomplete tail is retained until the next chunk arrives.
//! Pure and synchronous; the I/O layer owns buffering and backpressure.

#[derive(Debug, Default)]
pub struct LineFramer {
    buf: Vec<u8>,
}

impl LineFramer {
    pub fn new() -> Self {
        LineFramer { buf: Vec::new() }
    }

    /// Feed a chunk of bytes; returns every complete line found, in arrival
    /// order. The framer retains any trailing partial line internally.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        let mut start = 0usize;
        let mut i = 0usize;
        while i < self.buf.len() {
            match self.buf[i] {
                b'\r' => {
                    push_line(&mut lines, &self.buf[start..i]);
                    if i + 1 < self.buf.len() && self.buf[i + 1] == b'\n' {
                        i += 1;
                    }
                    start = i + 1;
                }
                b'\n' => {
                    push_line(&mut lines, &self.buf[start..i]);
                    start = i + 1;
                }
                _ => {}
            }
            i += 1;
        }
        self.buf.drain(0..start);
        lines
    }
}

fn push_line(lines: &mut Vec<String>, segment: &[u8]) {
    if segment.is_empty() {
        return;
    }
    lines.push(String::from_utf8_lossy(segment).into_owned());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_nothing_for_incomplete_line() {
        let mut f = LineFramer::new();
        assert!(f.feed(b"RGS# 2 20").is_empty());
    }

    #[test]
    fn completes_line_across_two_chunks() {
        let mut f = LineFramer::new();
        assert!(f.feed(b"RGS# 2 20").is_empty());
        let lines = f.feed(b" 7 1\r\n");
        assert_eq!(lines, vec!["RGS# 2 20 7 1".to_owned()]);
    }

    #[test]
    fn tolerates_cr_lf_and_crlf_in_one_chunk() {
        let mut f = LineFramer::new();
        let lines = f.feed(b"a\rb\nc\r\nd");
        assert_eq!(lines, vec!["a".to_owned(), "b".to_owned(), "c".to_owned()]);
        let rest = f.feed(b"\n");
        assert_eq!(rest, vec!["d".to_owned()]);
    }

    #[test]
    fn drops_empty_segments() {
        let mut f = LineFramer::new();
        let lines = f.feed(b"\r\n\r\na\r\n\r\n");
        assert_eq!(lines, vec!["a".to_owned()]);
    }

    #[test]
    fn emits_exactly_once_per_line_in_arrival_order() {
        let mut f = LineFramer::new();
        let lines = f.feed(b"one\ntwo\nthree\n");
        assert_eq!(
            lines,
            vec!["one".to_owned(), "two".to_owned(), "three".to_owned()]
        );
    }
}
