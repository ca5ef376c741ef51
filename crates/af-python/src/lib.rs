use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;

use af_tuner::{OptimizeDirection, SearchSpaceSpec, TunerConfig, TunerSession};
use af_types::{TrialParameters, TunerError};

/// autofe Python module
#[pymodule]
fn autofe(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add("__version__", env!("CARGO_PKG_VERSION"))?;
    m.add_class::<PyTuner>()?;
    Ok(())
}

fn to_py_err(err: TunerError) -> PyErr {
    match err {
        TunerError::Configuration(_) | TunerError::MalformedFeedback(_) => {
            PyValueError::new_err(err.to_string())
        }
        _ => PyRuntimeError::new_err(err.to_string()),
    }
}

/// Feature-subset tuner speaking the tuner protocol with JSON strings:
/// `update_search_space`, `generate_parameters`, `receive_trial_result`.
#[pyclass(name = "Tuner")]
struct PyTuner {
    inner: TunerSession,
}

#[pymethods]
impl PyTuner {
    #[new]
    #[pyo3(signature = (optimize_mode, feature_percent = 0.6, max_sample = 128, seed = None))]
    fn new(
        optimize_mode: &str,
        feature_percent: f64,
        max_sample: usize,
        seed: Option<u64>,
    ) -> PyResult<Self> {
        let direction: OptimizeDirection = optimize_mode.parse().map_err(to_py_err)?;
        let mut config = TunerConfig::new(direction)
            .with_feature_percent(feature_percent)
            .with_max_sample(max_sample);
        if let Some(seed) = seed {
            config = config.with_seed(seed);
        }
        let inner = TunerSession::new(config).map_err(to_py_err)?;
        Ok(Self { inner })
    }

    /// Replace the search space; returns the number of candidates.
    fn update_search_space(&self, search_space: &str) -> PyResult<usize> {
        let spec = SearchSpaceSpec::from_json(search_space).map_err(to_py_err)?;
        self.inner.update_search_space(&spec).map_err(to_py_err)
    }

    /// JSON `{"sample_feature": [...]}` for the next trial.
    fn generate_parameters(&self, parameter_id: u64) -> PyResult<String> {
        let parameters = self
            .inner
            .generate_parameters(parameter_id)
            .map_err(to_py_err)?;
        serde_json::to_string(&parameters).map_err(|e| PyRuntimeError::new_err(e.to_string()))
    }

    fn receive_trial_result(&self, parameter_id: u64, parameters: &str, value: &str) -> PyResult<()> {
        let parameters: TrialParameters = serde_json::from_str(parameters)
            .map_err(|e| PyValueError::new_err(format!("invalid parameters: {e}")))?;
        let value: serde_json::Value = serde_json::from_str(value)
            .map_err(|e| PyValueError::new_err(format!("invalid trial result: {e}")))?;
        self.inner
            .receive_trial_result(parameter_id, &parameters, &value)
            .map_err(to_py_err)
    }

    #[getter]
    fn trial_count(&self) -> u64 {
        self.inner.trial_count()
    }

    fn top_candidates(&self, k: usize) -> Vec<(String, f64)> {
        self.inner.top_candidates(k)
    }

    /// Session diagnostics as JSON.
    fn snapshot(&self) -> PyResult<String> {
        serde_json::to_string(&self.inner.snapshot())
            .map_err(|e| PyRuntimeError::new_err(e.to_string()))
    }

    fn __repr__(&self) -> String {
        let snapshot = self.inner.snapshot();
        format!(
            "Tuner(id='{}', phase={:?}, trials={}, candidates={})",
            snapshot.id, snapshot.phase, snapshot.trial_count, snapshot.universe_size
        )
    }
}
