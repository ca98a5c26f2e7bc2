//! Matrix axes and Cartesian expansion into concrete combinations.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::error::{MatrixError, Result};

/// Name of the implicit OS axis.
pub const OS_AXIS: &str = "os";

/// One configurable dimension of the test matrix.
///
/// Values are opaque labels; nothing here parses or compares versions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Axis {
    /// Axis name (e.g. "python", "cassandra").
    pub name: String,

    /// Ordered version identifiers.
    pub values: Vec<String>,
}

impl Axis {
    pub fn new(name: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    /// Environment variable naming the selected value (`python` -> `PYTHON_VERSION`).
    pub fn env_var_name(&self) -> String {
        env_var_for(&self.name)
    }
}

fn env_var_for(axis: &str) -> String {
    let mut name: String = axis
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    name.push_str("_VERSION");
    name
}

/// One concrete assignment of a value to every axis, plus the OS.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MatrixCombination {
    /// Position in expansion order (0-based).
    pub index: usize,

    /// `(axis, value)` pairs in axis declaration order, excluding the OS.
    pub values: Vec<(String, String)>,

    /// Selected OS value.
    pub os: String,

    /// SHA-256 over the ordered `(axis, value)` pairs including the OS.
    pub id: String,
}

impl MatrixCombination {
    fn new(index: usize, values: Vec<(String, String)>, os: String) -> Self {
        let mut hasher = Sha256::new();
        for (axis, value) in values
            .iter()
            .map(|(a, v)| (a.as_str(), v.as_str()))
            .chain(std::iter::once((OS_AXIS, os.as_str())))
        {
            hasher.update(axis.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
            hasher.update(b"\0");
        }
        let id = hex::encode(hasher.finalize());

        Self {
            index,
            values,
            os,
            id,
        }
    }

    /// Value selected for `axis`, including the OS axis.
    pub fn value(&self, axis: &str) -> Option<&str> {
        if axis == OS_AXIS {
            return Some(&self.os);
        }
        self.values
            .iter()
            .find(|(name, _)| name == axis)
            .map(|(_, value)| value.as_str())
    }

    /// Human-readable identity, e.g. `python=2.7 cassandra=dse-5.0 os=ubuntu/trusty64`.
    pub fn label(&self) -> String {
        let mut parts: Vec<String> = self
            .values
            .iter()
            .map(|(axis, value)| format!("{}={}", axis, value))
            .collect();
        parts.push(format!("{}={}", OS_AXIS, self.os));
        parts.join(" ")
    }

    /// Filesystem-safe directory name, unique within one expansion.
    pub fn slug(&self) -> String {
        let joined = self
            .values
            .iter()
            .map(|(_, value)| value.as_str())
            .chain(std::iter::once(self.os.as_str()))
            .collect::<Vec<_>>()
            .join("_");
        let safe: String = joined
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                    c
                } else {
                    '-'
                }
            })
            .collect();
        format!("{:03}-{}", self.index, safe)
    }

    /// Short id (first 12 chars).
    pub fn short_id(&self) -> &str {
        &self.id[..12.min(self.id.len())]
    }

    /// One `<AXIS>_VERSION` variable per axis, plus `OS_VERSION`.
    pub fn axis_env(&self) -> BTreeMap<String, String> {
        let mut env: BTreeMap<String, String> = self
            .values
            .iter()
            .map(|(axis, value)| (env_var_for(axis), value.clone()))
            .collect();
        env.insert(env_var_for(OS_AXIS), self.os.clone());
        env
    }
}

/// Expands declared axes into the full Cartesian product.
#[derive(Debug, Clone)]
pub struct MatrixExpander {
    axes: Vec<Axis>,
    os: Axis,
}

impl MatrixExpander {
    /// Validate the axes and build an expander.
    ///
    /// Fails with [`MatrixError::NoAxes`] when `axes` is empty, and rejects
    /// axes with no values or repeated names. Two axes whose names map to the
    /// same environment variable (`dse-graph` and `dse_graph`, or `OS` and the
    /// implicit os axis) are rejected with [`MatrixError::EnvVarCollision`].
    pub fn new(axes: Vec<Axis>, os: Vec<String>) -> Result<Self> {
        if axes.is_empty() {
            return Err(MatrixError::NoAxes);
        }

        let mut seen = HashSet::new();
        seen.insert(OS_AXIS.to_string());
        let mut vars = HashMap::new();
        vars.insert(env_var_for(OS_AXIS), OS_AXIS.to_string());
        for axis in &axes {
            if !seen.insert(axis.name.clone()) {
                return Err(MatrixError::DuplicateAxis {
                    axis: axis.name.clone(),
                });
            }
            let var = env_var_for(&axis.name);
            if let Some(first) = vars.get(&var) {
                return Err(MatrixError::EnvVarCollision {
                    first: first.clone(),
                    second: axis.name.clone(),
                    var,
                });
            }
            vars.insert(var, axis.name.clone());
            if axis.values.is_empty() {
                return Err(MatrixError::EmptyAxis {
                    axis: axis.name.clone(),
                });
            }
        }

        if os.is_empty() {
            return Err(MatrixError::EmptyAxis {
                axis: OS_AXIS.to_string(),
            });
        }

        Ok(Self {
            axes,
            os: Axis::new(OS_AXIS, os),
        })
    }

    pub fn axes(&self) -> &[Axis] {
        &self.axes
    }

    pub fn os_values(&self) -> &[String] {
        &self.os.values
    }

    /// Number of combinations `expand` will produce.
    pub fn len(&self) -> usize {
        self.axes
            .iter()
            .chain(std::iter::once(&self.os))
            .map(|axis| axis.values.len())
            .product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Produce every combination.
    ///
    /// The first declared axis varies slowest and the OS axis fastest, so
    /// identical input always yields identical order. Equal-looking tuples
    /// are kept as distinct combinations.
    pub fn expand(&self) -> Vec<MatrixCombination> {
        let dims: Vec<&Axis> = self.axes.iter().chain(std::iter::once(&self.os)).collect();
        let total = self.len();
        let mut combinations = Vec::with_capacity(total);
        let mut cursor = vec![0usize; dims.len()];

        for index in 0..total {
            let values = self
                .axes
                .iter()
                .zip(&cursor)
                .map(|(axis, &i)| (axis.name.clone(), axis.values[i].clone()))
                .collect();
            let os = self.os.values[cursor[dims.len() - 1]].clone();
            combinations.push(MatrixCombination::new(index, values, os));

            // Odometer increment, innermost dimension first.
            for d in (0..dims.len()).rev() {
                cursor[d] += 1;
                if cursor[d] < dims[d].values.len() {
                    break;
                }
                cursor[d] = 0;
            }
        }

        combinations
    }
}
