//! Shared test utilities for integration tests
//!
//! Provides fixture projects and record builders used across
//! multiple test files.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use assert_fs::prelude::*;
use chrono::Utc;
use taskctx::core::task::{
    CodeContext, CodeSection, ContextKind, ContextSource, SectionKind, TaskType,
};
use taskctx::infra::config::CollectorConfig;

/// Node-style source whose `processUser` body spans lines 40-50
pub fn user_js() -> String
{
    let mut body = String::new();

    // Filler module preamble up to line 39
    for i in 1..40
    {
        body.push_str(&format!("const setting{i} = {i};\n"));
    }

    // The crash site sits on line 45
    body.push_str("function processUser(user) {\n");
    for i in 41..45
    {
        body.push_str(&format!("  const step{i} = user.id + {i};\n"));
    }
    body.push_str("  return user.profile.name.trim();\n");
    for i in 46..51
    {
        body.push_str(&format!("  // step {i}\n"));
    }
    body.push_str("}\n");

    // Trailing exports keep the file past the frame window
    for i in 52..70
    {
        body.push_str(&format!("module.exports.helper{i} = () => {i};\n"));
    }
    body
}

/// A small multi-language project with a vendored directory that must
/// never be scanned
pub fn make_project() -> assert_fs::TempDir
{
    // Initialize the temporary project root
    let tmp = assert_fs::TempDir::new().expect("tempdir");

    tmp.child("src/user.js")
        .write_str(&user_js())
        .expect("write user.js");

    tmp.child("src/db.js")
        .write_str("const user = require('./user');\nfunction saveUser(u) { return user.processUser(u); }\n")
        .expect("write db.js");

    tmp.child("billing/invoice.py")
        .write_str(
            "import os\n\n\
             class InvoiceService:\n    \
             def charge_invoice(self, invoice):\n        \
             # totals are rounded before charging\n        \
             return round(invoice.total, 2)\n",
        )
        .expect("write invoice.py");

    // Vendored copy that mentions every entity
    tmp.child("node_modules/lib/user.js")
        .write_str("function processUser() {}\nfunction charge_invoice() {}\n")
        .expect("write vendored");

    tmp
}

/// Collector config rooted at `root` with defaults elsewhere
pub fn config_for(root: &Path) -> CollectorConfig
{
    CollectorConfig {
        root: root.to_path_buf(),
        ..Default::default()
    }
}

pub fn section(
    file: &str,
    score: f32,
    line: usize,
) -> CodeSection
{
    CodeSection {
        file_path: PathBuf::from(file),
        start_line: line,
        end_line: line + 2,
        content: format!("fn handler_{line}() {{}}"),
        score,
        kind: SectionKind::Function,
        related_entities: Vec::new(),
    }
}

pub fn context(
    id: &str,
    content: String,
    score: f32,
) -> CodeContext
{
    let now = Utc::now();
    CodeContext {
        id: id.to_string(),
        task_id: "T-1".to_string(),
        task_type: TaskType::Bug,
        kind: ContextKind::Snippet,
        source: ContextSource::Collected,
        file_path: Some(PathBuf::from("src/lib.rs")),
        start_line: Some(1),
        end_line: Some(10),
        content,
        description: format!("function in lib.rs ({id})"),
        relevance_score: score,
        keywords: Vec::new(),
        collected_at: now,
        last_checked_at: now,
        is_stale: false,
    }
}
