use crate::base::{self, canonical_base_key};
use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::filter::{evaluate_filter, FilterNode, FilterOutcome};
use crate::resolver;
use crate::schema::{Schema, SchemaView};
use crate::snapshot::{Snapshot, SnapshotCache};
use crate::value::compare_loose;
use crate::vault::{self, Note};
use opendal::Operator;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::HashSet;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RowFile {
    pub path: String,
    pub name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct QueryRow {
    pub file: RowFile,
    pub props: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub computed: Option<Map<String, Value>>,
}

/// A sort key as sent by callers: `"-priority"` or `{key, dir}`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum SortInput {
    Key(String),
    Spec {
        #[serde(alias = "property", alias = "column")]
        key: String,
        #[serde(default, alias = "direction")]
        dir: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortSpec {
    pub key: String,
    pub descending: bool,
}

impl SortSpec {
    /// A leading `-` means descending.
    pub fn parse(entry: &str) -> Self {
        let entry = entry.trim();
        match entry.strip_prefix('-') {
            Some(key) => SortSpec {
                key: key.trim().to_string(),
                descending: true,
            },
            None => SortSpec {
                key: entry.to_string(),
                descending: false,
            },
        }
    }
}

impl From<&SortInput> for SortSpec {
    fn from(input: &SortInput) -> Self {
        match input {
            SortInput::Key(entry) => SortSpec::parse(entry),
            SortInput::Spec { key, dir } => SortSpec {
                key: key.trim().to_string(),
                descending: dir
                    .as_deref()
                    .map(|d| d.eq_ignore_ascii_case("desc") || d.eq_ignore_ascii_case("descending"))
                    .unwrap_or(false),
            },
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct QueryRequest {
    pub view: Option<String>,
    pub filter: Option<FilterNode>,
    pub sort: Option<Vec<SortInput>>,
    pub limit: Option<i64>,
    pub page: Option<i64>,
    pub evaluate: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QuerySource {
    Engine,
    Fallback,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct QueryResponse {
    pub total: usize,
    pub page: usize,
    pub limit: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view: Option<String>,
    pub rows: Vec<QueryRow>,
    pub evaluate: bool,
    pub source: QuerySource,
    pub warnings: Vec<String>,
}

/// Insertion-ordered, deduplicated warnings with a hard cap.
#[derive(Debug)]
pub struct WarningSet {
    seen: HashSet<String>,
    list: Vec<String>,
    cap: usize,
    dropped: usize,
}

impl WarningSet {
    pub fn new(cap: usize) -> Self {
        Self {
            seen: HashSet::new(),
            list: Vec::new(),
            cap,
            dropped: 0,
        }
    }

    pub fn add(&mut self, warning: String) {
        if !self.seen.insert(warning.clone()) {
            return;
        }
        if self.list.len() >= self.cap {
            self.dropped += 1;
        } else {
            self.list.push(warning);
        }
    }

    pub fn finish(mut self) -> Vec<String> {
        if self.dropped > 0 {
            self.list.push(format!(
                "Warnings truncated: {} more not shown (cap {}).",
                self.dropped, self.cap
            ));
        }
        self.list
    }
}

fn clamp(value: i64, min: usize, max: usize) -> usize {
    if value < min as i64 {
        min
    } else if value > max as i64 {
        max
    } else {
        value as usize
    }
}

/// Builds the row for `note`: props in schema order, plus formulas when asked.
pub fn build_row(note: &Note, schema: &Schema, evaluate: bool) -> QueryRow {
    let props = schema
        .properties
        .iter()
        .map(|prop| {
            let value = resolver::resolve(note, &prop.key, Some(schema)).unwrap_or(Value::Null);
            (prop.key.clone(), value)
        })
        .collect();
    let computed = evaluate.then(|| {
        schema
            .formula_keys()
            .map(|key| {
                let value = resolver::resolve(note, &format!("formula.{}", key), Some(schema))
                    .unwrap_or(Value::Null);
                (key.clone(), value)
            })
            .collect()
    });
    QueryRow {
        file: RowFile {
            path: note.path.clone(),
            name: note.name.clone(),
        },
        props,
        computed,
    }
}

fn sort_specs(request: &QueryRequest, view: Option<&SchemaView>) -> Vec<SortSpec> {
    match &request.sort {
        Some(sort) if !sort.is_empty() => sort.iter().map(SortSpec::from).collect(),
        _ => view
            .map(|v| v.order.iter().map(|entry| SortSpec::parse(entry)).collect())
            .unwrap_or_default(),
    }
}

fn compare_keys(left: &[Option<Value>], right: &[Option<Value>], specs: &[SortSpec]) -> Ordering {
    for (index, spec) in specs.iter().enumerate() {
        let ordering = compare_loose(
            left.get(index).and_then(|v| v.as_ref()),
            right.get(index).and_then(|v| v.as_ref()),
        );
        if ordering != Ordering::Equal {
            return if spec.descending {
                ordering.reverse()
            } else {
                ordering
            };
        }
    }
    Ordering::Equal
}

/// Stable multi-key sort; equal keys keep enumeration order.
pub fn sort_notes(notes: Vec<Note>, specs: &[SortSpec], schema: &Schema) -> Vec<Note> {
    if specs.is_empty() {
        return notes;
    }
    let mut keyed: Vec<(Vec<Option<Value>>, Note)> = notes
        .into_iter()
        .map(|note| {
            let keys = specs
                .iter()
                .map(|spec| resolver::resolve(&note, &spec.key, Some(schema)))
                .collect();
            (keys, note)
        })
        .collect();
    keyed.sort_by(|a, b| compare_keys(&a.0, &b.0, specs));
    keyed.into_iter().map(|(_, note)| note).collect()
}

pub fn paginate<T: Clone>(items: &[T], page: usize, limit: usize) -> Vec<T> {
    let start = page.saturating_sub(1).saturating_mul(limit).min(items.len());
    let end = start.saturating_add(limit).min(items.len());
    items[start..end].to_vec()
}

/// Runs a query against a base.
pub async fn query(
    op: &Operator,
    vault_path: &str,
    cache: &SnapshotCache,
    config: &EngineConfig,
    base: &str,
    request: &QueryRequest,
) -> EngineResult<QueryResponse> {
    let base_key = canonical_base_key(base);
    let schema = base::get_schema(op, vault_path, &base_key).await?;
    let view = schema.view(request.view.as_deref());

    let limit = clamp(
        request
            .limit
            .or_else(|| {
                view.and_then(|v| v.limit)
                    .map(|l| i64::try_from(l).unwrap_or(i64::MAX))
            })
            .unwrap_or_else(|| i64::try_from(config.default_limit).unwrap_or(i64::MAX)),
        1,
        config.max_limit,
    );
    let page = clamp(request.page.unwrap_or(1), 1, config.max_page);

    let combined = FilterNode::combine([
        schema.filters.clone(),
        view.and_then(|v| v.filters.clone()),
        request.filter.clone(),
    ]);

    tracing::debug!(
        base = %base_key,
        view = ?view.map(|v| v.name.as_str()),
        limit,
        page,
        evaluate = request.evaluate,
        "planning query"
    );

    let mut warnings = WarningSet::new(config.max_warnings);
    let mut matches = Vec::new();
    for note in vault::list_notes(op, vault_path).await? {
        let outcome = evaluate_filter(&note, combined.as_ref(), Some(&schema));
        for warning in outcome.warnings {
            warnings.add(warning);
        }
        if outcome.ok {
            matches.push(note);
        }
    }

    let specs = sort_specs(request, view);
    let sorted = sort_notes(matches, &specs, &schema);

    let (rows, total, source) = if request.evaluate && config.live_engine {
        let snapshot = match cache.get(&base_key) {
            Some(snapshot) => snapshot,
            None => {
                let rows = sorted.iter().map(|note| build_row(note, &schema, true)).collect();
                let snapshot = Snapshot::new(rows);
                tracing::info!(base = %base_key, rows = snapshot.total, "snapshot populated lazily");
                cache.set(&base_key, snapshot.clone());
                snapshot
            }
        };
        (snapshot.page(page, limit), snapshot.total, QuerySource::Engine)
    } else {
        let rows = paginate(&sorted, page, limit)
            .iter()
            .map(|note| build_row(note, &schema, request.evaluate))
            .collect();
        (rows, sorted.len(), QuerySource::Fallback)
    };

    let warnings = warnings.finish();
    tracing::debug!(
        base = %base_key,
        total,
        returned = rows.len(),
        warnings = warnings.len(),
        "query finished"
    );

    Ok(QueryResponse {
        total,
        page,
        limit,
        view: view.map(|v| v.name.clone()),
        rows,
        evaluate: request.evaluate,
        source,
        warnings,
    })
}

/// Evaluates an ad-hoc filter against a single note, optionally with a base's formulas.
pub async fn evaluate_note_filter(
    op: &Operator,
    vault_path: &str,
    path: &str,
    filter: Option<&FilterNode>,
    base: Option<&str>,
) -> EngineResult<FilterOutcome> {
    let note = vault::get_note(op, vault_path, path).await?;
    let schema = match base {
        Some(base) => Some(base::get_schema(op, vault_path, base).await?),
        None => None,
    };
    Ok(evaluate_filter(&note, filter, schema.as_ref()))
}
