use memchr::memchr2;

/// Simple pull parser which returns all lines in an RTSP message head.
///
/// Lines are terminated with either `\n` or `\r\n` followed by anything but a
/// whitespace; a whitespace continues the previous line (folded headers).
#[derive(Clone)]
pub struct PullParser<'i> {
    input: &'i [u8],
    progress: usize,
}

/// semi-error type that just signals that the input is incomplete
#[derive(Debug, PartialEq, Eq)]
pub struct Incomplete(());

impl<'i> PullParser<'i> {
    /// Returns a new PullParser with input and progress
    pub fn new(input: &'i [u8], progress: usize) -> Self {
        Self { input, progress }
    }

    /// Returns the index of the last character of the message-head inside the
    /// slice, only valid after the parser returned None
    pub fn head_end(&self) -> usize {
        match self.input[self.progress..] {
            [b'\r', b'\n', b'\r', b'\n', ..] => self.progress + 4,
            [b'\n', b'\n', ..] => self.progress + 2,
            _ => self.progress,
        }
    }

    /// Returns the current progress.
    ///
    /// Saving the parser progress when encountering an incomplete message
    /// inside a streaming transport avoids parsing the same lines twice.
    pub fn progress(&self) -> usize {
        self.progress
    }

    /// Perform a dry run of the parser to check if the input is incomplete
    pub fn check_complete(&mut self) -> Result<(), Incomplete> {
        for res in self {
            let _ = res?;
        }

        Ok(())
    }
}

impl<'i> Iterator for PullParser<'i> {
    type Item = Result<&'i [u8], Incomplete>;

    fn next(&mut self) -> Option<Self::Item> {
        let line_begin = self.progress;

        let mut skip = 0;

        loop {
            let progress = match memchr2(b'\n', b'\r', &self.input[line_begin + skip..]) {
                None => return Some(Err(Incomplete(()))),
                Some(progress) => progress,
            };

            let pos = progress + line_begin + skip;

            match self.input[pos..] {
                [b'\n', b' ' | b'\t', ..] | [b'\r', b'\n', b' ' | b'\t', ..] => {
                    // whitespace after newline means its not a new line
                    skip += progress + 1;
                }
                [b'\n', b, ..] => {
                    let slice = &self.input[line_begin..pos];

                    if slice.is_empty() {
                        return None;
                    }

                    if b == b'\n' {
                        self.progress = pos;
                    } else {
                        self.progress = pos + 1;
                    }

                    return Some(Ok(slice));
                }
                [b'\r', b'\n', b1, b2, ..] => {
                    let slice = &self.input[line_begin..pos];

                    if slice.is_empty() {
                        return None;
                    }

                    if b1 == b'\r' && b2 == b'\n' {
                        self.progress = pos;
                    } else {
                        self.progress = pos + 2;
                    }

                    return Some(Ok(slice));
                }
                _ => {
                    // a char is required after the newline, so the message
                    // head cannot be complete yet
                    return Some(Err(Incomplete(())));
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn complete_head() {
        let msg = b"DESCRIBE rtsp://host/s RTSP/1.0\r\nCSeq: 2\r\nAccept: application/sdp\r\n\r\n";

        let mut parser = PullParser::new(msg, 0);

        assert_eq!(
            parser.next(),
            Some(Ok(&b"DESCRIBE rtsp://host/s RTSP/1.0"[..]))
        );
        assert_eq!(parser.next(), Some(Ok(&b"CSeq: 2"[..])));
        assert_eq!(parser.next(), Some(Ok(&b"Accept: application/sdp"[..])));
        assert_eq!(parser.next(), None);
        assert_eq!(parser.head_end(), msg.len());
    }

    #[test]
    fn incomplete_head() {
        let msg = b"DESCRIBE rtsp://host/s RTSP/1.0\r\nCSeq: 2\r\nAcc";

        let mut parser = PullParser::new(msg, 0);

        assert_eq!(
            parser.next(),
            Some(Ok(&b"DESCRIBE rtsp://host/s RTSP/1.0"[..]))
        );
        assert_eq!(parser.next(), Some(Ok(&b"CSeq: 2"[..])));
        assert!(parser.next().unwrap().is_err());
    }

    #[test]
    fn folded_header_line() {
        let msg = b"OPTIONS rtsp://host/s RTSP/1.0\r\nPublic: OPTIONS,\r\n DESCRIBE\r\n\r\n";

        let mut parser = PullParser::new(msg, 0);

        parser.next().unwrap().unwrap();
        assert_eq!(
            parser.next(),
            Some(Ok(&b"Public: OPTIONS,\r\n DESCRIBE"[..]))
        );
        assert_eq!(parser.next(), None);
    }
}
