const WIDTH: usize = 0x10;

pub fn printable(chr: u8) -> Option<char> {
    if (0x20..0x7f).contains(&chr) {
        Some(chr as char)
    } else {
        None
    }
}

/// One row of a dump, or a marker for repeated rows.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Line<'a> {
    Data { offset: usize, data: &'a [u8] },
    Repeated,
}

impl std::fmt::Display for Line<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let (offset, data) = match self {
            Self::Data { offset, data } => (offset, data),
            Self::Repeated => return write!(f, "*"),
        };

        write!(f, "{:04x}", offset)?;
        if data.is_empty() {
            return Ok(());
        }

        for i in 0..WIDTH {
            if i % 8 == 0 {
                write!(f, " ")?;
            }
            match data.get(i) {
                Some(b) => write!(f, " {:02x}", b)?,
                None => write!(f, "   ")?,
            }
        }

        write!(f, "  |")?;
        for b in data.iter() {
            write!(f, "{}", printable(*b).unwrap_or('.'))?;
        }
        write!(f, "|")
    }
}

/// Rows of a dump, ending with a bare offset line. Runs of identical
/// rows collapse into one [Line::Repeated].
#[derive(Debug, Clone)]
pub struct Lines<'a> {
    data: &'a [u8],
    next: usize,
    done: bool,
    last: Option<&'a [u8]>,
    repeating: bool,
}

impl<'a> Lines<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            next: 0,
            done: false,
            last: None,
            repeating: false,
        }
    }
}

impl<'a> Iterator for Lines<'a> {
    type Item = Line<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let offset = self.next;
            if offset >= self.data.len() {
                if self.done {
                    return None;
                }
                self.done = true;
                return Some(Line::Data { offset, data: &[] });
            }

            let end = (offset + WIDTH).min(self.data.len());
            let data = &self.data[offset..end];
            self.next = end;

            if self.last == Some(data) {
                if !self.repeating {
                    self.repeating = true;
                    return Some(Line::Repeated);
                }
            } else {
                self.last = Some(data);
                self.repeating = false;
                return Some(Line::Data { offset, data });
            }
        }
    }
}

pub fn hexdump(prefix: &str, data: &[u8]) {
    for line in Lines::new(data) {
        println!("{}{}", prefix, line);
    }
}
