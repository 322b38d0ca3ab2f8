//! Query specs whose parameters are encrypted with the settings of the path
//! they are compared against.

use serde_json::Value;

use crate::error::Result;
use crate::processor::EncryptionContext;
use crate::store::{QuerySpec, SqlParameter};

#[derive(Debug, Clone)]
struct EncryptionParameter {
    path: String,
    name: String,
    value: Value,
}

/// A [`QuerySpec`] plus parameters bound to encrypted paths.
///
/// ```ignore
/// let mut query = SqlQuerySpecWithEncryption::new(
///     QuerySpec::new("SELECT * FROM c WHERE c.sensitiveString = @s"),
/// );
/// query.add_encryption_parameter("/sensitiveString", "@s", "testingString");
/// ```
///
/// The query text is sent unchanged. A parameter bound to a randomized path
/// fails before the query is dispatched.
#[derive(Debug, Clone)]
pub struct SqlQuerySpecWithEncryption {
    spec: QuerySpec,
    encryption_parameters: Vec<EncryptionParameter>,
}

impl SqlQuerySpecWithEncryption {
    pub fn new(spec: QuerySpec) -> Self {
        Self {
            spec,
            encryption_parameters: Vec::new(),
        }
    }

    /// Bind `name` to `value`, encrypted as if stored at `path`.
    pub fn add_encryption_parameter(
        &mut self,
        path: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<Value>,
    ) -> &mut Self {
        self.encryption_parameters.push(EncryptionParameter {
            path: path.into(),
            name: name.into(),
            value: value.into(),
        });
        self
    }

    pub fn query_spec(&self) -> &QuerySpec {
        &self.spec
    }

    /// Final spec with encrypted parameters replacing same-named plain ones.
    pub(crate) fn encrypt(&self, context: &EncryptionContext) -> Result<QuerySpec> {
        let mut spec = self.spec.clone();
        for parameter in &self.encryption_parameters {
            let value = context.encrypt_query_parameter(&parameter.path, &parameter.value)?;
            spec.parameters.retain(|p| p.name != parameter.name);
            spec.parameters.push(SqlParameter {
                name: parameter.name.clone(),
                value,
            });
        }
        Ok(spec)
    }
}

impl From<QuerySpec> for SqlQuerySpecWithEncryption {
    fn from(spec: QuerySpec) -> Self {
        Self::new(spec)
    }
}

impl From<&str> for SqlQuerySpecWithEncryption {
    fn from(text: &str) -> Self {
        Self::new(QuerySpec::new(text))
    }
}
