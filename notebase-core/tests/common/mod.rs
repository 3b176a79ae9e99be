use _notebase_core::vault::{self, Note};
use anyhow::Result;
use opendal::services::Memory;
use opendal::Operator;

#[allow(dead_code)]
pub const VAULT: &str = "vault";

#[allow(dead_code)]
pub fn setup_operator() -> Result<Operator> {
    let builder = Memory::default();
    let op = Operator::new(builder)?.finish();
    Ok(op)
}

#[allow(dead_code)]
pub async fn write_note(op: &Operator, path: &str, markdown: &str) -> Result<Note> {
    Ok(vault::write_note(op, VAULT, path, markdown).await?)
}

/// In-memory note for pure evaluator tests.
#[allow(dead_code)]
pub fn note(path: &str, markdown: &str) -> Note {
    Note::from_markdown(path, markdown, Default::default())
}
