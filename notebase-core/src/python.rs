use crate::config::{self, EngineConfig};
use crate::filter::FilterNode;
use crate::query::{self, QueryRequest, QueryRow};
use crate::snapshot::SnapshotCache;
use crate::upsert::{self, UpsertOperation};
use crate::{base, logging, similarity, storage};
use opendal::Operator;
use pyo3::exceptions::{PyKeyError, PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::{PyDict, PyList};
use pyo3::IntoPyObjectExt;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use crate::error::EngineError;

// --- Helpers ---

fn get_operator(config: &Bound<'_, PyDict>) -> PyResult<Operator> {
    let uri = config
        .get_item("uri")?
        .ok_or_else(|| PyValueError::new_err("Missing 'uri' in storage config"))?
        .extract::<String>()?;

    storage::operator_from_uri(&uri).map_err(|e| PyValueError::new_err(e.to_string()))
}

fn to_py_err(err: EngineError) -> PyErr {
    match err {
        EngineError::Validation(_) => PyValueError::new_err(err.to_string()),
        EngineError::NotFound(_) => PyKeyError::new_err(err.to_string()),
        _ => PyRuntimeError::new_err(format!("{}: {}", err.code(), err)),
    }
}

fn parse_json<T: serde::de::DeserializeOwned>(raw: &str, what: &str) -> PyResult<T> {
    serde_json::from_str(raw).map_err(|e| PyValueError::new_err(format!("invalid {}: {}", what, e)))
}

fn json_to_py(py: Python<'_>, value: Value) -> PyResult<PyObject> {
    match value {
        Value::Null => Ok(py.None()),
        Value::Bool(b) => b.into_py_any(py),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.into_py_any(py)
            } else if let Some(f) = n.as_f64() {
                f.into_py_any(py)
            } else {
                n.to_string().into_py_any(py)
            }
        }
        Value::String(s) => s.into_py_any(py),
        Value::Array(arr) => {
            let list = PyList::empty(py);
            for item in arr {
                list.append(json_to_py(py, item)?)?;
            }
            Ok(list.into())
        }
        Value::Object(map) => {
            let dict = PyDict::new(py);
            for (k, v) in map {
                dict.set_item(k, json_to_py(py, v)?)?;
            }
            Ok(dict.into())
        }
    }
}

fn serialize_to_py<T: Serialize>(value: &T) -> PyResult<PyObject> {
    let json = serde_json::to_value(value).map_err(|e| PyRuntimeError::new_err(e.to_string()))?;
    Python::with_gil(|py| json_to_py(py, json))
}

// --- Bindings ---

/// Query engine bound to one vault.
#[pyclass]
struct Engine {
    op: Operator,
    vault: String,
    cache: Arc<SnapshotCache>,
}

impl Engine {
    fn context(&self) -> (Operator, String) {
        (self.op.clone(), self.vault.clone())
    }
}

#[pymethods]
impl Engine {
    #[new]
    fn new(storage_config: Bound<'_, PyDict>, vault: String) -> PyResult<Self> {
        Ok(Self {
            op: get_operator(&storage_config)?,
            vault,
            cache: Arc::new(SnapshotCache::new()),
        })
    }

    fn query<'a>(
        &self,
        py: Python<'a>,
        base: String,
        request_json: Option<String>,
    ) -> PyResult<Bound<'a, PyAny>> {
        let request: QueryRequest = match request_json {
            Some(raw) => parse_json(&raw, "query request")?,
            None => QueryRequest::default(),
        };
        let (op, vault) = self.context();
        let cache = self.cache.clone();
        pyo3_async_runtimes::tokio::future_into_py(py, async move {
            let config: EngineConfig = config::load_config(&op, &vault).await.map_err(to_py_err)?;
            let response = query::query(&op, &vault, &cache, &config, &base, &request)
                .await
                .map_err(to_py_err)?;
            serialize_to_py(&response)
        })
    }

    fn schema<'a>(&self, py: Python<'a>, base: String) -> PyResult<Bound<'a, PyAny>> {
        let (op, vault) = self.context();
        pyo3_async_runtimes::tokio::future_into_py(py, async move {
            let schema = base::get_schema(&op, &vault, &base).await.map_err(to_py_err)?;
            serialize_to_py(&schema)
        })
    }

    #[pyo3(signature = (path, filter_json, base=None))]
    fn evaluate_filter<'a>(
        &self,
        py: Python<'a>,
        path: String,
        filter_json: String,
        base: Option<String>,
    ) -> PyResult<Bound<'a, PyAny>> {
        let filter: Value = parse_json(&filter_json, "filter")?;
        let filter = FilterNode::from_value(&filter);
        let (op, vault) = self.context();
        pyo3_async_runtimes::tokio::future_into_py(py, async move {
            let outcome =
                query::evaluate_note_filter(&op, &vault, &path, filter.as_ref(), base.as_deref())
                    .await
                    .map_err(to_py_err)?;
            serialize_to_py(&outcome)
        })
    }

    #[pyo3(signature = (operations_json, continue_on_error=false))]
    fn upsert<'a>(
        &self,
        py: Python<'a>,
        operations_json: String,
        continue_on_error: bool,
    ) -> PyResult<Bound<'a, PyAny>> {
        let operations: Vec<UpsertOperation> = parse_json(&operations_json, "upsert operations")?;
        let (op, vault) = self.context();
        pyo3_async_runtimes::tokio::future_into_py(py, async move {
            let response = upsert::upsert_batch(&op, &vault, &operations, continue_on_error).await;
            serialize_to_py(&response)
        })
    }

    fn read_base_config<'a>(&self, py: Python<'a>, base: String) -> PyResult<Bound<'a, PyAny>> {
        let (op, vault) = self.context();
        pyo3_async_runtimes::tokio::future_into_py(py, async move {
            base::read_base_config(&op, &vault, &base).await.map_err(to_py_err)
        })
    }

    fn write_base_config<'a>(
        &self,
        py: Python<'a>,
        base: String,
        raw: String,
    ) -> PyResult<Bound<'a, PyAny>> {
        let (op, vault) = self.context();
        pyo3_async_runtimes::tokio::future_into_py(py, async move {
            base::write_base_config(&op, &vault, &base, &raw)
                .await
                .map_err(to_py_err)
        })
    }

    fn push_snapshot(&self, base: String, rows_json: String) -> PyResult<usize> {
        let rows: Vec<QueryRow> = parse_json(&rows_json, "snapshot rows")?;
        Ok(self.cache.push(&base, rows).total)
    }

    fn snapshot_keys(&self) -> Vec<String> {
        self.cache.keys()
    }

    #[pyo3(signature = (vector_file, path, top_k=similarity::DEFAULT_TOP_K, min_score=None))]
    fn similar<'a>(
        &self,
        py: Python<'a>,
        vector_file: String,
        path: String,
        top_k: usize,
        min_score: Option<f32>,
    ) -> PyResult<Bound<'a, PyAny>> {
        let (op, vault) = self.context();
        pyo3_async_runtimes::tokio::future_into_py(py, async move {
            let file = storage::join(&vault, &vector_file);
            let records = similarity::load_vector_records(&op, &file)
                .await
                .map_err(to_py_err)?;
            let options = similarity::SearchOptions {
                top_k,
                min_score,
                exclude_path: None,
            };
            let hits = similarity::search_by_note(&records, &path, &options).map_err(to_py_err)?;
            serialize_to_py(&hits)
        })
    }
}

#[pymodule]
fn _notebase_core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    logging::init_tracing();
    m.add_class::<Engine>()?;
    Ok(())
}
