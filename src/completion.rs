use std::fs;
use std::path::Path;

pub trait Completer {
    /// Candidate completions for `partial`, best first.
    fn suggest<'a>(&'a self, partial: &'a str) -> Box<dyn Iterator<Item = String> + 'a>;
}

/// Completes from a fixed word list.
#[derive(Debug, Clone)]
pub struct WordCompleter {
    words: Vec<String>,
    match_middle: bool,
}

impl WordCompleter {
    pub fn new(words: &[String]) -> Self {
        Self {
            words: words.to_vec(),
            match_middle: false,
        }
    }

    /// Also offer words that contain `partial` anywhere, not just as a prefix.
    pub fn match_middle(mut self) -> Self {
        self.match_middle = true;
        self
    }
}

impl Completer for WordCompleter {
    fn suggest<'a>(&'a self, partial: &'a str) -> Box<dyn Iterator<Item = String> + 'a> {
        let match_middle = self.match_middle;
        Box::new(
            self.words
                .iter()
                .filter(move |w| {
                    if match_middle {
                        w.contains(partial)
                    } else {
                        w.starts_with(partial)
                    }
                })
                .cloned(),
        )
    }
}

/// Completes filesystem paths by listing the directory being typed.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathCompleter;

impl Completer for PathCompleter {
    fn suggest<'a>(&'a self, partial: &'a str) -> Box<dyn Iterator<Item = String> + 'a> {
        let (head, prefix) = match partial.rfind('/') {
            Some(i) => (&partial[..=i], &partial[i + 1..]),
            None => ("", partial),
        };
        let dir = if head.is_empty() {
            Path::new(".")
        } else {
            Path::new(head)
        };

        // Unreadable directories just yield nothing.
        let mut candidates: Vec<String> = match fs::read_dir(dir) {
            Ok(entries) => entries
                .filter_map(|entry| entry.ok())
                .filter_map(|entry| {
                    let name = entry.file_name().into_string().ok()?;
                    let hidden = name.starts_with('.') && !prefix.starts_with('.');
                    if !name.starts_with(prefix) || hidden {
                        return None;
                    }
                    let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
                    let suffix = if is_dir { "/" } else { "" };
                    Some(format!("{}{}{}", head, name, suffix))
                })
                .collect(),
            Err(_) => Vec::new(),
        };
        candidates.sort();
        Box::new(candidates.into_iter())
    }
}
