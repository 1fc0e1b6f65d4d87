//! Line scanner and tokenizer for shorthand source
//!
//! The grammar is line-oriented: entity headers, metadata lines and `*`
//! rules each occupy one logical line. The scanner normalizes line endings,
//! strips comments, and merges the physical lines of a triple-quoted string
//! into the logical line that opened it. The tokenizer then splits a logical
//! line into words, quoted strings and bracketed groups.

/// One logical line of source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLine {
    /// 1-based first physical line
    pub number: usize,
    /// 1-based last physical line (differs when a multi-line string spans)
    pub end_number: usize,
    pub text: String,
}

/// A token within a logical line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub text: String,
    /// 1-based column of the token start on its physical line
    pub col: usize,
    /// True when the token was a (double- or triple-) quoted string; `text`
    /// is the processed content without quotes
    pub is_string: bool,
}

impl Token {
    fn word(text: impl Into<String>, col: usize) -> Self {
        Self {
            text: text.into(),
            col,
            is_string: false,
        }
    }

    fn string(text: impl Into<String>, col: usize) -> Self {
        Self {
            text: text.into(),
            col,
            is_string: true,
        }
    }
}

/// Split source into logical lines
///
/// Handles `\r\n` normalization, `//` line comments (a `//` run directly
/// attached to preceding text is part of a URL, not a comment), `/* */`
/// block comments, and triple-quoted strings spanning physical lines.
pub fn logical_lines(source: &str) -> Vec<SourceLine> {
    let normalized = source.replace("\r\n", "\n").replace('\r', "\n");
    let mut lines = Vec::new();

    let mut current = String::new();
    let mut start_line = 1usize;
    let mut line_no = 1usize;
    let mut in_triple = false;
    let mut in_block_comment = false;

    let mut chars = normalized.chars().peekable();
    while let Some(ch) = chars.next() {
        if in_block_comment {
            if ch == '*' && chars.peek() == Some(&'/') {
                chars.next();
                in_block_comment = false;
            } else if ch == '\n' {
                line_no += 1;
            }
            continue;
        }

        if in_triple {
            current.push(ch);
            if ch == '\n' {
                line_no += 1;
            } else if ch == '"' && current.ends_with("\"\"\"") && !current.ends_with("\"\"\"\"") {
                // A lone closing fence; the opening fence was consumed before
                // entering triple mode, so three quotes close it
                in_triple = false;
            }
            continue;
        }

        match ch {
            '\n' => {
                lines.push(SourceLine {
                    number: start_line,
                    end_number: line_no,
                    text: std::mem::take(&mut current),
                });
                line_no += 1;
                start_line = line_no;
            }
            '"' if chars.peek() == Some(&'"') => {
                // Possible triple quote
                current.push(ch);
                let second = chars.next().unwrap();
                current.push(second);
                if chars.peek() == Some(&'"') {
                    current.push(chars.next().unwrap());
                    in_triple = true;
                }
            }
            '"' => {
                // Regular string: copy through to the closing quote
                current.push(ch);
                let mut escaped = false;
                for c in chars.by_ref() {
                    current.push(c);
                    if escaped {
                        escaped = false;
                    } else if c == '\\' {
                        escaped = true;
                    } else if c == '"' {
                        break;
                    } else if c == '\n' {
                        line_no += 1;
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'/') => {
                // Comment only when detached from preceding text (URLs carry
                // their slashes directly after the colon)
                let detached = current
                    .chars()
                    .last()
                    .map(|c| c.is_whitespace())
                    .unwrap_or(true);
                if detached {
                    for c in chars.by_ref() {
                        if c == '\n' {
                            lines.push(SourceLine {
                                number: start_line,
                                end_number: line_no,
                                text: std::mem::take(&mut current),
                            });
                            line_no += 1;
                            start_line = line_no;
                            break;
                        }
                    }
                } else {
                    current.push(ch);
                    current.push(chars.next().unwrap());
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                in_block_comment = true;
            }
            _ => current.push(ch),
        }
    }

    if !current.is_empty() {
        lines.push(SourceLine {
            number: start_line,
            end_number: line_no,
            text: current,
        });
    }

    lines
}

/// Tokenize one logical line
///
/// Double- and triple-quoted strings become string tokens with their content
/// processed; single-quoted unit codes keep their quotes; a parenthesized
/// group (`Reference(A or B)`, `(exactly)`) stays one token, attached to the
/// word it follows; `,`, `:` and `=` standing alone are their own tokens.
pub fn tokenize(line: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = line.chars().collect();
    let mut i = 0usize;

    while i < chars.len() {
        let ch = chars[i];
        let col = i + 1;

        if ch.is_whitespace() {
            i += 1;
            continue;
        }

        if ch == '"' {
            if chars.get(i + 1) == Some(&'"') && chars.get(i + 2) == Some(&'"') {
                // Triple-quoted string
                i += 3;
                let start = i;
                while i < chars.len() {
                    if chars[i] == '"'
                        && chars.get(i + 1) == Some(&'"')
                        && chars.get(i + 2) == Some(&'"')
                    {
                        break;
                    }
                    i += 1;
                }
                let raw: String = chars[start..i.min(chars.len())].iter().collect();
                i = (i + 3).min(chars.len());
                tokens.push(Token::string(process_multiline_string(&raw), col));
            } else {
                i += 1;
                let mut content = String::new();
                let mut escaped = false;
                while i < chars.len() {
                    let c = chars[i];
                    i += 1;
                    if escaped {
                        match c {
                            'n' => content.push('\n'),
                            't' => content.push('\t'),
                            other => content.push(other),
                        }
                        escaped = false;
                    } else if c == '\\' {
                        escaped = true;
                    } else if c == '"' {
                        break;
                    } else {
                        content.push(c);
                    }
                }
                tokens.push(Token::string(content, col));
            }
            continue;
        }

        if ch == '\'' {
            // Single-quoted unit code, quotes kept for the value parser
            let start = i;
            i += 1;
            while i < chars.len() && chars[i] != '\'' {
                i += 1;
            }
            i = (i + 1).min(chars.len());
            let text: String = chars[start..i].iter().collect();
            tokens.push(Token::word(text, col));
            continue;
        }

        if ch == ',' || (ch == ':' && is_isolated(&chars, i)) || (ch == '=' && is_isolated(&chars, i))
        {
            tokens.push(Token::word(ch.to_string(), col));
            i += 1;
            continue;
        }

        if ch == '(' {
            let (group, next) = read_paren_group(&chars, i);
            tokens.push(Token::word(group, col));
            i = next;
            continue;
        }

        // Word token; a '(' continues the word as a group (Reference(...))
        let start = i;
        let mut word = String::new();
        while i < chars.len() {
            let c = chars[i];
            if c.is_whitespace() || c == ',' {
                break;
            }
            if c == '(' {
                let (group, next) = read_paren_group(&chars, i);
                word.push_str(&group);
                i = next;
                continue;
            }
            if c == '"' {
                break;
            }
            word.push(c);
            i += 1;
        }
        if !word.is_empty() {
            tokens.push(Token::word(word, start + 1));
        } else {
            i += 1;
        }
    }

    tokens
}

fn is_isolated(chars: &[char], i: usize) -> bool {
    let before_ws = i == 0 || chars[i - 1].is_whitespace();
    let after_ws = i + 1 >= chars.len() || chars[i + 1].is_whitespace();
    before_ws && after_ws
}

fn read_paren_group(chars: &[char], mut i: usize) -> (String, usize) {
    let mut group = String::new();
    let mut depth = 0usize;
    while i < chars.len() {
        let c = chars[i];
        group.push(c);
        i += 1;
        if c == '(' {
            depth += 1;
        } else if c == ')' {
            depth -= 1;
            if depth == 0 {
                break;
            }
        }
    }
    (group, i)
}

/// Process the body of a triple-quoted string: the first line is discarded
/// when blank, a trailing whitespace-only line is discarded, and the common
/// leading indentation of the remaining lines is stripped
pub fn process_multiline_string(raw: &str) -> String {
    let mut lines: Vec<&str> = raw.split('\n').collect();

    if let Some(first) = lines.first() {
        if first.trim().is_empty() {
            lines.remove(0);
        }
    }
    if let Some(last) = lines.last() {
        if last.trim().is_empty() {
            lines.pop();
        }
    }

    let indent = lines
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);

    lines
        .iter()
        .map(|l| {
            if l.len() >= indent {
                l[indent..].trim_end()
            } else {
                l.trim_end()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logical_lines_basic() {
        let lines = logical_lines("Profile: Foo\nParent: Bar\n");
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].text, "Profile: Foo");
        assert_eq!(lines[1].number, 2);
    }

    #[test]
    fn test_crlf_normalization() {
        let lines = logical_lines("A: x\r\nB: y\r\n");
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].text, "A: x");
    }

    #[test]
    fn test_line_comments_and_urls() {
        let lines = logical_lines("* path = \"v\" // trailing\n* code from http://foo.org\n");
        assert_eq!(lines[0].text.trim_end(), "* path = \"v\"");
        assert!(lines[1].text.contains("http://foo.org"));
    }

    #[test]
    fn test_block_comment() {
        let lines = logical_lines("Profile: A\n/* two\nlines */\nParent: B\n");
        let texts: Vec<&str> = lines
            .iter()
            .map(|l| l.text.trim())
            .filter(|t| !t.is_empty())
            .collect();
        assert_eq!(texts, vec!["Profile: A", "Parent: B"]);
    }

    #[test]
    fn test_multiline_string_merges_lines() {
        let source = "* description = \"\"\"\n    line one\n    line two\n    \"\"\"\n* other = true\n";
        let lines = logical_lines(source);
        let non_empty: Vec<&SourceLine> =
            lines.iter().filter(|l| !l.text.trim().is_empty()).collect();
        assert_eq!(non_empty.len(), 2);
        assert_eq!(non_empty[0].number, 1);
        assert_eq!(non_empty[0].end_number, 4);

        let tokens = tokenize(&non_empty[0].text);
        let string = tokens.iter().find(|t| t.is_string).unwrap();
        assert_eq!(string.text, "line one\nline two");
    }

    #[test]
    fn test_tokenize_strings_and_words() {
        let tokens = tokenize("* name.given = \"Jean \\\"JJ\\\"\"");
        assert_eq!(tokens[0].text, "*");
        assert_eq!(tokens[1].text, "name.given");
        assert_eq!(tokens[2].text, "=");
        assert!(tokens[3].is_string);
        assert_eq!(tokens[3].text, "Jean \"JJ\"");
    }

    #[test]
    fn test_tokenize_reference_group() {
        let tokens = tokenize("* subject only Reference(Patient or Group)");
        assert_eq!(tokens[3].text, "Reference(Patient or Group)");
    }

    #[test]
    fn test_tokenize_quantity_and_ratio() {
        let tokens = tokenize("* amount = 1.5 'mg' : 2 'mL'");
        let texts: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["*", "amount", "=", "1.5", "'mg'", ":", "2", "'mL'"]);
    }

    #[test]
    fn test_tokenize_comma_paths() {
        let tokens = tokenize("* name, birthDate MS");
        let texts: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["*", "name", ",", "birthDate", "MS"]);
    }

    #[test]
    fn test_process_multiline_string_indent() {
        let processed = process_multiline_string("\n      first\n        indented\n      last\n      ");
        assert_eq!(processed, "first\n  indented\nlast");
    }
}
