//! Line-regex definition extractor for languages without a grammar here
//! (JavaScript/TypeScript, Java/Kotlin, Go, C-family, C#, Ruby, PHP, ...).
//!
//! A definition line is recognized by regex; its end comes from brace
//! matching when a `{` opens within the next lines, otherwise from
//! indentation. Spans are capped at [`MAX_SPAN`] lines.

use anyhow::Result;
use regex::Regex;

use crate::core::definitions::{Definition, DefinitionExtractor, DefinitionKind};

/// Longest span reported for one definition
pub const MAX_SPAN: usize = 200;

/// Lines after the signature searched for the opening brace
const BRACE_LOOKAHEAD: usize = 2;

const CONTROL_WORDS: &[&str] = &[
    "if", "for", "while", "switch", "catch", "return", "else", "new", "sizeof", "function", "do",
    "try", "with", "elif", "foreach", "using", "lock",
];

pub struct RegexDefinitions {
    functions: Vec<Regex>,
    classes: Vec<Regex>,
}

impl RegexDefinitions {
    pub fn new() -> Result<Self> {
        let functions = [
            // JS/TS function declarations
            r"^\s*(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s*\*?\s*([A-Za-z_$][\w$]*)\s*[(<]",
            // const f = (...) => / const f = function
            r"^\s*(?:export\s+)?(?:const|let|var)\s+([A-Za-z_$][\w$]*)\s*(?::[^=]+)?=\s*(?:async\s+)?(?:function\b|\([^)]*\)\s*(?::[^=]+)?=>|[A-Za-z_$][\w$]*\s*=>)",
            // Go
            r"^\s*func\s+(?:\([^)]*\)\s*)?([A-Za-z_]\w*)\s*[(\[]",
            // Rust
            r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:const\s+)?(?:async\s+)?(?:unsafe\s+)?fn\s+([A-Za-z_]\w*)",
            // Python/Ruby
            r"^\s*(?:async\s+)?def\s+(?:self\.)?([A-Za-z_]\w*[?!]?)",
            // Kotlin
            r"^\s*(?:(?:public|private|protected|internal|override|open|suspend|inline)\s+)*fun\s+(?:<[^>]*>\s*)?(?:[\w.]+\.)?([A-Za-z_]\w*)\s*\(",
            // PHP
            r"^\s*(?:(?:public|private|protected|static|final|abstract)\s+)*function\s+&?([A-Za-z_]\w*)\s*\(",
            // Java/C#/TS members with modifiers
            r"^\s*(?:(?:public|private|protected|internal|static|final|abstract|synchronized|override|virtual|async|readonly)\s+)+(?:[\w<>\[\],.?]+\s+)*?([A-Za-z_$][\w$]*)\s*\(",
            // JS/TS class method shorthand: name(args) {
            r"^\s*(?:async\s+)?(?:static\s+)?(?:get\s+|set\s+)?([A-Za-z_$][\w$]*)\s*\([^)]*\)\s*(?::\s*[^{]+)?\{\s*$",
            // C/C++ top-level functions
            r"^[A-Za-z_][\w\s\*&:<>,]*?[\s\*&]([A-Za-z_]\w*)\s*\([^;]*$",
        ];
        let classes = [
            r"^\s*(?:export\s+)?(?:default\s+)?(?:(?:pub(?:\([^)]*\))?|public|private|protected|internal|abstract|final|sealed|static|data|open|partial)\s+)*(?:class|interface|struct|enum|trait|object|record|module)\s+([A-Za-z_$][\w$]*)",
            // Go
            r"^\s*type\s+([A-Za-z_]\w*)\s+(?:struct|interface)\b",
        ];

        Ok(Self {
            functions: functions
                .iter()
                .map(|p| Regex::new(p))
                .collect::<Result<_, _>>()?,
            classes: classes
                .iter()
                .map(|p| Regex::new(p))
                .collect::<Result<_, _>>()?,
        })
    }

    fn classify(&self, line: &str) -> Option<(String, DefinitionKind)> {
        let first = |set: &[Regex]| {
            set.iter()
                .find_map(|re| re.captures(line))
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
        };

        if let Some(name) = first(self.classes.as_slice()) {
            return Some((name, DefinitionKind::Class));
        }

        first(self.functions.as_slice())
            .filter(|name| !CONTROL_WORDS.contains(&name.as_str()))
            .map(|name| (name, DefinitionKind::Function))
    }
}

impl DefinitionExtractor for RegexDefinitions {
    fn definitions(&self, content: &str) -> Result<Vec<Definition>> {
        let lines: Vec<&str> = content.lines().collect();

        let mut out: Vec<Definition> = lines
            .iter()
            .enumerate()
            .filter_map(|(i, line)| {
                let (name, kind) = self.classify(line)?;
                Some(Definition {
                    name,
                    kind,
                    start_line: i + 1,
                    end_line: block_end(&lines, i) + 1,
                    members: Vec::new(),
                })
            })
            .collect();

        // Class members are the functions starting inside its span
        let functions: Vec<(usize, String)> = out
            .iter()
            .filter(|d| d.kind == DefinitionKind::Function)
            .map(|d| (d.start_line, d.name.clone()))
            .collect();
        for class in out.iter_mut().filter(|d| d.kind == DefinitionKind::Class) {
            class.members = functions
                .iter()
                .filter(|(line, _)| *line > class.start_line && *line <= class.end_line)
                .map(|(_, name)| name.clone())
                .collect();
        }

        Ok(out)
    }

    fn language(&self) -> &'static str {
        "generic"
    }
}

/// 0-based index of the last line of the block starting at `start`
fn block_end(lines: &[&str], start: usize) -> usize {
    let cap = (start + MAX_SPAN - 1).min(lines.len().saturating_sub(1));

    // Prototype or abstract declaration
    if lines[start].trim_end().ends_with(';') {
        return start;
    }

    let open = (start..=(start + BRACE_LOOKAHEAD).min(cap)).find(|&i| lines[i].contains('{'));
    match open {
        Some(open) => brace_end(lines, open, cap),
        None => indent_end(lines, start, cap),
    }
}

/// Count braces outside string literals until depth returns to zero
fn brace_end(lines: &[&str], open: usize, cap: usize) -> usize {
    let mut depth: i64 = 0;

    for (i, line) in lines.iter().enumerate().take(cap + 1).skip(open) {
        let mut quote: Option<char> = None;
        let mut escaped = false;

        for c in line.chars() {
            if let Some(q) = quote {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == q {
                    quote = None;
                }
                continue;
            }
            match c {
                '"' | '\'' | '`' => quote = Some(c),
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth <= 0 {
                        return i;
                    }
                }
                _ => {}
            }
        }
    }
    cap
}

/// Last following line indented deeper than `start`, skipping blanks
fn indent_end(lines: &[&str], start: usize, cap: usize) -> usize {
    let indent = |l: &str| l.len() - l.trim_start().len();
    let base = indent(lines[start]);

    let mut end = start;
    for (i, line) in lines.iter().enumerate().take(cap + 1).skip(start + 1) {
        if line.trim().is_empty() {
            continue;
        }
        if indent(line) <= base {
            break;
        }
        end = i;
    }
    end
}

#[cfg(test)]
mod tests {
    use super::*;

    fn find<'a>(defs: &'a [Definition], name: &str) -> &'a Definition {
        defs.iter()
            .find(|d| d.name == name)
            .expect("definition not found")
    }

    #[test]
    fn javascript_functions_and_classes() -> Result<()> {
        let ex = RegexDefinitions::new()?;
        let src = r#"const db = require('./db');

function processUser(user) {
  if (!user) {
    return null;
  }
  return { id: user.id, label: "}" };
}

export const formatName = (user) => {
  return user.name;
};

class UserService {
  constructor(repo) {
    this.repo = repo;
  }

  async save(user) {
    return this.repo.put(user);
  }
}
"#;
        let defs = ex.definitions(src)?;

        let process = find(&defs, "processUser");
        assert_eq!(process.kind, DefinitionKind::Function);
        assert_eq!((process.start_line, process.end_line), (3, 8));

        let format = find(&defs, "formatName");
        assert_eq!((format.start_line, format.end_line), (10, 12));

        let service = find(&defs, "UserService");
        assert_eq!(service.kind, DefinitionKind::Class);
        assert_eq!((service.start_line, service.end_line), (14, 22));
        assert_eq!(service.members, vec!["constructor", "save"]);

        // `if (!user) {` is control flow, not a definition
        assert!(defs.iter().all(|d| d.name != "if"));
        Ok(())
    }

    #[test]
    fn go_and_java_shapes() -> Result<()> {
        let ex = RegexDefinitions::new()?;
        let go = "type Cart struct {\n\tItems []int\n}\n\nfunc (c *Cart) Total() int {\n\treturn 0\n}\n";
        let defs = ex.definitions(go)?;
        assert_eq!(find(&defs, "Cart").kind, DefinitionKind::Class);
        let total = find(&defs, "Total");
        assert_eq!((total.start_line, total.end_line), (5, 7));

        let java = "public class Cart {\n    private int n;\n\n    public int checkout(String id)\n    {\n        return n;\n    }\n}\n";
        let defs = ex.definitions(java)?;
        let checkout = find(&defs, "checkout");
        assert_eq!((checkout.start_line, checkout.end_line), (4, 7));
        assert_eq!(find(&defs, "Cart").members, vec!["checkout"]);
        Ok(())
    }

    #[test]
    fn indentation_span_without_braces() -> Result<()> {
        let ex = RegexDefinitions::new()?;
        let ruby = "class Cart\n  def total\n    0\n  end\n\n  def empty?\n    true\n  end\nend\n";
        let defs = ex.definitions(ruby)?;

        let total = find(&defs, "total");
        assert_eq!((total.start_line, total.end_line), (2, 3));
        assert_eq!(find(&defs, "empty?").start_line, 6);
        Ok(())
    }

    #[test]
    fn spans_are_capped() -> Result<()> {
        let ex = RegexDefinitions::new()?;
        let mut src = String::from("function huge() {\n");
        for i in 0..400 {
            src.push_str(&format!("  step{i}();\n"));
        }
        src.push_str("}\n");

        let defs = ex.definitions(&src)?;
        let huge = find(&defs, "huge");
        assert_eq!(huge.end_line - huge.start_line + 1, MAX_SPAN);
        Ok(())
    }
}
