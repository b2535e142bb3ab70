//! Stack trace detection and parsing for bug reports.
//!
//! Text is scanned once per dialect for positioned events (exception
//! headers, traceback openers, frames). Events are merged in text order
//! and segmented into traces, so a trace pasted on a single line parses
//! the same as a multi-line one. Each trace is scored for confidence and
//! only valid traces above [`MIN_CONFIDENCE`] are kept.

use std::ops::Range;

use anyhow::Result;
use memchr::memmem;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

/// Traces at or below this confidence are discarded
pub const MIN_CONFIDENCE: f32 = 0.5;

/// Frames kept per trace
const MAX_FRAMES: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceLanguage
{
    JavaScript,
    Python,
    Java,
    Rust,
}

impl TraceLanguage
{
    pub fn as_str(self) -> &'static str
    {
        match self
        {
            TraceLanguage::JavaScript => "javascript",
            TraceLanguage::Python => "python",
            TraceLanguage::Java => "java",
            TraceLanguage::Rust => "rust",
        }
    }
}

/// Priority tier of a frame by its position in the trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FramePriority
{
    High,
    Medium,
    Low,
}

impl FramePriority
{
    /// Top frame is high, its two callers medium, the rest low
    pub fn for_index(index: usize) -> Self
    {
        match index
        {
            0 => FramePriority::High,
            1 | 2 => FramePriority::Medium,
            _ => FramePriority::Low,
        }
    }

    pub fn weight(self) -> f32
    {
        match self
        {
            FramePriority::High => 0.9,
            FramePriority::Medium => 0.7,
            FramePriority::Low => 0.5,
        }
    }
}

/// One call site, innermost first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackFrame
{
    /// Path exactly as written in the trace
    pub file: String,
    pub line: usize,
    pub column: Option<usize>,
    pub function: Option<String>,
    pub priority: FramePriority,
    /// priority weight × trace confidence, clamped to 1.0
    pub relevance: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedStackTrace
{
    pub language: TraceLanguage,
    pub error_type: Option<String>,
    pub message: Option<String>,
    pub frames: Vec<StackFrame>,
    pub confidence: f32,
    pub is_valid: bool,
}

impl ParsedStackTrace
{
    /// The failing frame
    pub fn top_frame(&self) -> Option<&StackFrame>
    {
        self.frames
            .first()
    }
}

/// Frame as found in text, before trace-level scoring
#[derive(Debug, Clone)]
struct RawFrame
{
    file: String,
    line: usize,
    column: Option<usize>,
    function: Option<String>,
    language: TraceLanguage,
    /// Matched a dialect's full frame shape (function and location)
    clean: bool,
}

#[derive(Debug, Clone)]
enum EventKind
{
    Header
    {
        error_type: String,
        message: Option<String>,
    },
    TracebackStart,
    Frame(RawFrame),
    /// Looked like a frame line but no dialect parsed it
    Unparsed,
}

#[derive(Debug, Clone)]
struct Event
{
    span: Range<usize>,
    kind: EventKind,
}

fn overlaps(
    a: &Range<usize>,
    b: &Range<usize>,
) -> bool
{
    a.start < b.end && b.start < a.end
}

/// One trace syntax. Dialects report positioned events; segmentation is shared.
trait TraceDialect: Send + Sync
{
    fn scan(
        &self,
        text: &str,
        out: &mut Vec<Event>,
    );
}

/// Rust panics (`thread 'main' panicked at src/main.rs:4:5:`) and backtraces
struct RustDialect
{
    panic: Regex,
    backtrace: Regex,
}

impl TraceDialect for RustDialect
{
    fn scan(
        &self,
        text: &str,
        out: &mut Vec<Event>,
    )
    {
        for caps in self
            .panic
            .captures_iter(text)
        {
            let (Some(whole), Some(file), Some(line)) = (caps.get(0), caps.get(2), caps.get(3))
            else
            {
                continue;
            };
            let Ok(line) = line
                .as_str()
                .parse()
            else
            {
                continue;
            };

            // Old format quotes the message; new format puts it on the next line
            let message = caps
                .get(1)
                .map(|m| {
                    m.as_str()
                        .to_string()
                })
                .or_else(|| {
                    text[whole.end()..]
                        .trim_start_matches(':')
                        .lines()
                        .map(str::trim)
                        .find(|l| !l.is_empty())
                        .map(str::to_string)
                });

            out.push(Event {
                span: whole.start()..whole.start() + 1,
                kind: EventKind::Header {
                    error_type: "panic".to_string(),
                    message,
                },
            });
            out.push(Event {
                span: whole.start() + 1..whole.end(),
                kind: EventKind::Frame(RawFrame {
                    file: file
                        .as_str()
                        .to_string(),
                    line,
                    column: caps
                        .get(4)
                        .and_then(|c| {
                            c.as_str()
                                .parse()
                                .ok()
                        }),
                    function: None,
                    language: TraceLanguage::Rust,
                    clean: true,
                }),
            });
        }

        for caps in self
            .backtrace
            .captures_iter(text)
        {
            let (Some(whole), Some(func), Some(file), Some(line)) =
                (caps.get(0), caps.get(1), caps.get(2), caps.get(3))
            else
            {
                continue;
            };
            let Ok(line) = line
                .as_str()
                .parse()
            else
            {
                continue;
            };

            out.push(Event {
                span: whole.range(),
                kind: EventKind::Frame(RawFrame {
                    file: file
                        .as_str()
                        .to_string(),
                    line,
                    column: caps
                        .get(4)
                        .and_then(|c| {
                            c.as_str()
                                .parse()
                                .ok()
                        }),
                    function: Some(
                        func.as_str()
                            .to_string(),
                    ),
                    language: TraceLanguage::Rust,
                    clean: true,
                }),
            });
        }
    }
}

/// `Traceback (most recent call last):` + `File "x.py", line N, in fn`
struct PythonDialect
{
    start: Regex,
    frame: Regex,
}

impl TraceDialect for PythonDialect
{
    fn scan(
        &self,
        text: &str,
        out: &mut Vec<Event>,
    )
    {
        for m in self
            .start
            .find_iter(text)
        {
            out.push(Event {
                span: m.range(),
                kind: EventKind::TracebackStart,
            });
        }

        for caps in self
            .frame
            .captures_iter(text)
        {
            let (Some(whole), Some(file), Some(line)) = (caps.get(0), caps.get(1), caps.get(2))
            else
            {
                continue;
            };
            let Ok(line) = line
                .as_str()
                .parse()
            else
            {
                continue;
            };
            let function = caps
                .get(3)
                .map(|f| {
                    f.as_str()
                        .to_string()
                });

            out.push(Event {
                span: whole.range(),
                kind: EventKind::Frame(RawFrame {
                    file: file
                        .as_str()
                        .to_string(),
                    line,
                    column: None,
                    clean: function.is_some(),
                    function,
                    language: TraceLanguage::Python,
                }),
            });
        }
    }
}

/// `at com.acme.Cls.method(Cls.java:42)`; the file path is rebuilt from the package
struct JavaDialect
{
    frame: Regex,
}

impl TraceDialect for JavaDialect
{
    fn scan(
        &self,
        text: &str,
        out: &mut Vec<Event>,
    )
    {
        for caps in self
            .frame
            .captures_iter(text)
        {
            let (Some(whole), Some(qualified), Some(file), Some(line)) =
                (caps.get(0), caps.get(1), caps.get(2), caps.get(3))
            else
            {
                continue;
            };
            let Ok(line) = line
                .as_str()
                .parse()
            else
            {
                continue;
            };

            // com.acme.Cls.method -> com/acme/Cls.java
            let qualified = qualified.as_str();
            let package: Vec<&str> = qualified
                .split('.')
                .collect();
            let path = if package.len() > 2
            {
                format!("{}/{}", package[..package.len() - 2].join("/"), file.as_str())
            }
            else
            {
                file.as_str()
                    .to_string()
            };

            out.push(Event {
                span: whole.range(),
                kind: EventKind::Frame(RawFrame {
                    file: path,
                    line,
                    column: None,
                    function: Some(qualified.to_string()),
                    language: TraceLanguage::Java,
                    clean: true,
                }),
            });
        }
    }
}

/// V8 frames: `at fn (file:line:col)` and bare `at file:line:col`
struct JavaScriptDialect
{
    named: Regex,
    bare: Regex,
}

impl TraceDialect for JavaScriptDialect
{
    fn scan(
        &self,
        text: &str,
        out: &mut Vec<Event>,
    )
    {
        let mut taken: Vec<Range<usize>> = Vec::new();

        for caps in self
            .named
            .captures_iter(text)
        {
            let (Some(whole), Some(func), Some(location)) = (caps.get(0), caps.get(1), caps.get(2))
            else
            {
                continue;
            };
            let Some((file, line, column)) = split_file_line_col(location.as_str())
            else
            {
                continue;
            };

            taken.push(whole.range());
            out.push(Event {
                span: whole.range(),
                kind: EventKind::Frame(RawFrame {
                    file: file.to_string(),
                    line,
                    column,
                    function: Some(
                        func.as_str()
                            .to_string(),
                    ),
                    language: TraceLanguage::JavaScript,
                    clean: true,
                }),
            });
        }

        for caps in self
            .bare
            .captures_iter(text)
        {
            let (Some(whole), Some(location)) = (caps.get(0), caps.get(1))
            else
            {
                continue;
            };
            if taken
                .iter()
                .any(|t| overlaps(t, &whole.range()))
            {
                continue;
            }
            let Some((file, line, column)) = split_file_line_col(location.as_str())
            else
            {
                continue;
            };

            out.push(Event {
                span: whole.range(),
                kind: EventKind::Frame(RawFrame {
                    file: file.to_string(),
                    line,
                    column,
                    function: None,
                    language: TraceLanguage::JavaScript,
                    clean: false,
                }),
            });
        }
    }
}

/// Split "file:line:col" or "file:line" from the end, so "C:\x\y.js:10:5" works
fn split_file_line_col(s: &str) -> Option<(&str, usize, Option<usize>)>
{
    let last = s.rfind(':')?;
    let (pre, right) = s.split_at(last);
    let right = &right[1..];

    if let Some(mid) = pre.rfind(':')
    {
        let (file, line_s) = pre.split_at(mid);
        if let (Ok(line_no), Ok(col)) = (line_s[1..].parse::<usize>(), right.parse::<usize>())
        {
            return Some((file, line_no, Some(col)));
        }
    }

    let line_no = right
        .parse::<usize>()
        .ok()?;
    Some((pre, line_no, None))
}

/// Cheap pre-check before running any regex.
/// Strong cues answer immediately; a bare "at " also needs a `:<digit>`.
pub fn contains_stack_trace(text: &str) -> bool
{
    let bytes = text.as_bytes();
    const STRONG: [&str; 3] = ["Traceback (most recent call last)", "panicked at", "File \""];

    if STRONG
        .iter()
        .any(|cue| memmem::find(bytes, cue.as_bytes()).is_some())
    {
        return true;
    }

    if memmem::find(bytes, b"at ").is_none()
    {
        return false;
    }

    memchr::memchr_iter(b':', bytes).any(|i| {
        bytes
            .get(i + 1)
            .is_some_and(u8::is_ascii_digit)
    })
}

/// Trace under construction during segmentation
#[derive(Debug, Default)]
struct Draft
{
    python: bool,
    error_type: Option<String>,
    message: Option<String>,
    frames: Vec<RawFrame>,
    unparsed: usize,
}

impl Draft
{
    fn finish(self) -> Option<ParsedStackTrace>
    {
        let mut raw = self.frames;
        if raw.is_empty()
        {
            return None;
        }

        let language = if self.python
        {
            TraceLanguage::Python
        }
        else
        {
            majority_language(&raw)
        };

        // Python prints the innermost call last
        if language == TraceLanguage::Python
        {
            raw.reverse();
        }

        let mut seen = std::collections::HashSet::new();
        raw.retain(|f| seen.insert((f.file.clone(), f.line)));
        raw.truncate(MAX_FRAMES);

        let attempted = raw.len() + self.unparsed;
        let clean = raw
            .iter()
            .filter(|f| f.clean)
            .count();

        let header_score = if self
            .error_type
            .is_some()
        {
            1.0
        }
        else
        {
            0.5
        };
        let clean_ratio = clean as f32 / attempted as f32;
        let depth = raw
            .len()
            .min(3) as f32
            / 3.0;
        let confidence = (0.5 * header_score + 0.3 * clean_ratio + 0.2 * depth).min(1.0);

        let is_valid = raw
            .iter()
            .any(|f| {
                f.line > 0
                    && !f
                        .file
                        .trim()
                        .is_empty()
            });

        let frames = raw
            .into_iter()
            .enumerate()
            .map(|(i, f)| {
                let priority = FramePriority::for_index(i);
                StackFrame {
                    file: f.file,
                    line: f.line,
                    column: f.column,
                    function: f.function,
                    priority,
                    relevance: (priority.weight() * confidence).min(1.0),
                }
            })
            .collect();

        Some(ParsedStackTrace {
            language,
            error_type: self.error_type,
            message: self.message,
            frames,
            confidence,
            is_valid,
        })
    }
}

fn majority_language(frames: &[RawFrame]) -> TraceLanguage
{
    let mut counts: Vec<(TraceLanguage, usize)> = Vec::new();
    for f in frames
    {
        match counts
            .iter_mut()
            .find(|(l, _)| *l == f.language)
        {
            Some((_, n)) => *n += 1,
            None => counts.push((f.language, 1)),
        }
    }

    // Ties go to the language seen first
    counts
        .iter()
        .fold(None::<(TraceLanguage, usize)>, |best, &(l, n)| {
            match best
            {
                Some((_, bn)) if bn >= n => best,
                _ => Some((l, n)),
            }
        })
        .map(|(l, _)| l)
        .unwrap_or(TraceLanguage::JavaScript)
}

/// Multi-dialect parser. Construct once and reuse.
pub struct StackTraceParser
{
    dialects: Vec<Box<dyn TraceDialect>>,
    header: Regex,
    frame_like: Regex,
}

impl StackTraceParser
{
    pub fn new() -> Result<Self>
    {
        // Order matters: earlier dialects claim overlapping text first
        let dialects: Vec<Box<dyn TraceDialect>> = vec![
            Box::new(RustDialect {
                panic: Regex::new(
                    r"panicked at (?:'([^'\n]*)', )?([^\s:'\x22]+\.rs):(\d+)(?::(\d+))?",
                )?,
                backtrace: Regex::new(
                    r"(?m)^\s*\d+:\s+(\S+)[ \t]*\r?\n\s+at\s+(\S+?\.rs):(\d+)(?::(\d+))?",
                )?,
            }),
            Box::new(PythonDialect {
                start: Regex::new(r"Traceback \(most recent call last\):")?,
                frame: Regex::new(r#"File "([^"\n]+)", line (\d+)(?:, in ([^\s,]+))?"#)?,
            }),
            Box::new(JavaDialect {
                frame: Regex::new(
                    r"\bat\s+([\w$]+(?:\.[\w$<>]+)+)\(([\w$\-]+\.(?:java|kt|scala|groovy)):(\d+)\)",
                )?,
            }),
            Box::new(JavaScriptDialect {
                named: Regex::new(r"\bat\s+(?:async\s+)?([^\s()]+(?: \[as [^\]\s]+\])?)\s+\(([^()\s]+)\)")?,
                bare: Regex::new(r"\bat\s+(?:async\s+)?([^\s()]+:\d+(?::\d+)?)")?,
            }),
        ];

        Ok(Self {
            dialects,
            header: Regex::new(
                r"\b((?:[A-Za-z_][A-Za-z0-9_]*\.)*[A-Z]?[A-Za-z0-9_]*(?:Error|Exception))\b",
            )?,
            frame_like: Regex::new(r#"(?m)^[ \t]*(?:at\s+\S|File ")"#)?,
        })
    }

    /// Parse every valid, confident trace in `text`
    #[instrument(level = "debug", skip_all, fields(len = text.len()))]
    pub fn parse(
        &self,
        text: &str,
    ) -> Vec<ParsedStackTrace>
    {
        if !contains_stack_trace(text)
        {
            return Vec::new();
        }

        let events = self.events(text);
        let traces: Vec<ParsedStackTrace> = segment(events)
            .into_iter()
            .filter(|t| t.is_valid && t.confidence > MIN_CONFIDENCE)
            .collect();

        debug!(traces = traces.len(), "parsed stack traces");
        traces
    }

    /// All positioned events in text order
    fn events(
        &self,
        text: &str,
    ) -> Vec<Event>
    {
        let mut found: Vec<Event> = Vec::new();
        for dialect in &self.dialects
        {
            let mut local = Vec::new();
            dialect.scan(text, &mut local);

            for ev in local
            {
                let claimed = matches!(ev.kind, EventKind::Frame(_))
                    && found
                        .iter()
                        .any(|e| {
                            matches!(e.kind, EventKind::Frame(_)) && overlaps(&e.span, &ev.span)
                        });
                if !claimed
                {
                    found.push(ev);
                }
            }
        }

        let frame_spans: Vec<Range<usize>> = found
            .iter()
            .filter(|e| matches!(e.kind, EventKind::Frame(_)))
            .map(|e| {
                e.span
                    .clone()
            })
            .collect();

        // Exception headers outside frames; message runs to the next frame or EOL
        for caps in self
            .header
            .captures_iter(text)
        {
            let Some(m) = caps.get(1)
            else
            {
                continue;
            };
            if frame_spans
                .iter()
                .any(|s| overlaps(s, &m.range()))
            {
                continue;
            }

            let rest = &text[m.end()..];
            if !rest.starts_with(':')
                && !rest.starts_with('\n')
                && !rest.starts_with("\r\n")
                && !rest.is_empty()
                && !rest.starts_with(" at ")
            {
                // Prose mention ("a TypeError when saving"), not a header
                continue;
            }

            let eol = memchr::memchr(b'\n', rest.as_bytes()).unwrap_or(rest.len());
            let next_frame = frame_spans
                .iter()
                .filter(|s| s.start >= m.end())
                .map(|s| s.start - m.end())
                .min()
                .unwrap_or(rest.len());
            let message = rest[..eol.min(next_frame)]
                .trim_start_matches(':')
                .trim();

            found.push(Event {
                span: m.range(),
                kind: EventKind::Header {
                    error_type: m
                        .as_str()
                        .to_string(),
                    message: (!message.is_empty()).then(|| message.to_string()),
                },
            });
        }

        // Lines shaped like frames that no dialect parsed lower confidence
        for m in self
            .frame_like
            .find_iter(text)
        {
            let eol = memchr::memchr(b'\n', &text.as_bytes()[m.start()..])
                .map(|i| m.start() + i)
                .unwrap_or(text.len());
            let line = m.start()..eol;
            if !frame_spans
                .iter()
                .any(|s| overlaps(s, &line))
            {
                found.push(Event {
                    span: line,
                    kind: EventKind::Unparsed,
                });
            }
        }

        found.sort_by_key(|e| {
            e.span
                .start
        });
        found
    }
}

/// Group ordered events into traces
fn segment(events: Vec<Event>) -> Vec<ParsedStackTrace>
{
    let mut out = Vec::new();
    let mut cur: Option<Draft> = None;

    let flush = |out: &mut Vec<ParsedStackTrace>, draft: Option<Draft>| {
        if let Some(trace) = draft.and_then(Draft::finish)
        {
            out.push(trace);
        }
    };

    for ev in events
    {
        match ev.kind
        {
            EventKind::TracebackStart =>
            {
                flush(&mut out, cur.take());
                cur = Some(Draft {
                    python: true,
                    ..Default::default()
                });
            }
            EventKind::Header { error_type, message } =>
            {
                // Python prints the exception after its frames
                let python_footer = cur
                    .as_ref()
                    .is_some_and(|d| {
                        d.python
                            && !d
                                .frames
                                .is_empty()
                            && d.error_type
                                .is_none()
                    });
                let awaiting_frames = cur
                    .as_ref()
                    .is_some_and(|d| {
                        d.frames
                            .is_empty()
                    });

                if python_footer || awaiting_frames
                {
                    if let Some(d) = cur.as_mut()
                    {
                        d.error_type = Some(error_type);
                        d.message = message;
                    }
                    if python_footer
                    {
                        flush(&mut out, cur.take());
                    }
                }
                else
                {
                    flush(&mut out, cur.take());
                    cur = Some(Draft {
                        error_type: Some(error_type),
                        message,
                        ..Default::default()
                    });
                }
            }
            EventKind::Frame(frame) =>
            {
                cur.get_or_insert_with(Draft::default)
                    .frames
                    .push(frame);
            }
            EventKind::Unparsed =>
            {
                if let Some(d) = cur.as_mut()
                {
                    d.unparsed += 1;
                }
            }
        }
    }
    flush(&mut out, cur.take());

    out
}
