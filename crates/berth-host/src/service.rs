//! Service descriptions, the catalog, and registry metadata.
//!
//! Hosted implementations are registered declaratively: each one describes
//! its invokable methods as `(name, params, invoker)` records through
//! [`ServiceBuilder`]. The declared parameter schema serves two masters:
//! it is advertised to the registry inside the instance metadata, and the
//! dispatcher validates every incoming call against it before invoking.
//!
//! An identifier's *safe registry name* is `"SERVICE@@" + sanitize(key)`,
//! where sanitizing strips every character outside `[A-Za-z0-9_-]`.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use berth_registry::InstanceRecord;

/// Prefix of every safe registry name.
pub const SERVICE_PREFIX: &str = "SERVICE@@";

/// Primitive type tag a declared parameter enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    Int,
    Float,
    Bool,
    String,
    /// Matches any JSON value
    Mixed,
}

impl ParamType {
    /// Whether `value` satisfies this tag.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ParamType::Int => value.is_i64() || value.is_u64(),
            ParamType::Float => value.is_number(),
            ParamType::Bool => value.is_boolean(),
            ParamType::String => value.is_string(),
            ParamType::Mixed => true,
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            ParamType::Int => "int",
            ParamType::Float => "float",
            ParamType::Bool => "bool",
            ParamType::String => "string",
            ParamType::Mixed => "mixed",
        };
        f.write_str(tag)
    }
}

/// One declared parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ParamType,
    pub required: bool,
}

impl ParamSpec {
    pub fn required(name: &str, ty: ParamType) -> Self {
        Self {
            name: name.to_string(),
            ty,
            required: true,
        }
    }

    pub fn optional(name: &str, ty: ParamType) -> Self {
        Self {
            name: name.to_string(),
            ty,
            required: false,
        }
    }
}

/// Invocation target: positional JSON arguments in, result or message out.
pub type Invoker =
    Arc<dyn Fn(&[Value]) -> std::result::Result<Value, String> + Send + Sync>;

/// One invokable method with its declared schema.
#[derive(Clone)]
pub struct MethodSpec {
    pub name: String,
    pub params: Vec<ParamSpec>,
    invoker: Invoker,
}

impl MethodSpec {
    pub fn invoke(&self, args: &[Value]) -> std::result::Result<Value, String> {
        (self.invoker)(args)
    }

    /// Number of parameters a call must at least supply.
    pub fn required_count(&self) -> usize {
        self.params.iter().filter(|p| p.required).count()
    }
}

impl fmt::Debug for MethodSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodSpec")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// A bound service implementation: ordered methods plus identity.
#[derive(Debug, Clone)]
pub struct ServiceImpl {
    pub type_name: String,
    pub description: String,
    methods: Vec<MethodSpec>,
}

impl ServiceImpl {
    pub fn method(&self, name: &str) -> Option<&MethodSpec> {
        self.methods.iter().find(|m| m.name == name)
    }

    pub fn methods(&self) -> &[MethodSpec] {
        &self.methods
    }
}

/// Declarative builder for a [`ServiceImpl`].
pub struct ServiceBuilder {
    type_name: String,
    description: String,
    methods: Vec<MethodSpec>,
}

impl ServiceBuilder {
    pub fn new(type_name: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            description: String::new(),
            methods: Vec::new(),
        }
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    /// Declare one method. Declaration order is preserved in the advertised
    /// metadata.
    pub fn method<F>(mut self, name: &str, params: Vec<ParamSpec>, invoker: F) -> Self
    where
        F: Fn(&[Value]) -> std::result::Result<Value, String> + Send + Sync + 'static,
    {
        self.methods.push(MethodSpec {
            name: name.to_string(),
            params,
            invoker: Arc::new(invoker),
        });
        self
    }

    pub fn build(self) -> ServiceImpl {
        ServiceImpl {
            type_name: self.type_name,
            description: self.description,
            methods: self.methods,
        }
    }
}

/// Factory registry mapping qualified implementation names to constructors.
///
/// The host resolves every enabled `service.<k>.service_name` against this
/// catalog at startup; a missing entry aborts startup.
#[derive(Default)]
pub struct ServiceCatalog {
    factories: HashMap<String, Box<dyn Fn() -> ServiceImpl + Send + Sync>>,
}

impl ServiceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, type_name: &str, factory: F)
    where
        F: Fn() -> ServiceImpl + Send + Sync + 'static,
    {
        self.factories.insert(type_name.to_string(), Box::new(factory));
    }

    pub fn instantiate(&self, type_name: &str) -> Option<ServiceImpl> {
        self.factories.get(type_name).map(|f| f())
    }
}

/// Drop every character outside `[A-Za-z0-9_-]`.
pub fn sanitize(key: &str) -> String {
    key.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

/// The name actually published to the registry for an identifier.
pub fn safe_registry_name(key: &str) -> String {
    format!("{SERVICE_PREFIX}{}", sanitize(key))
}

/// One hosted identifier, ready for registration and dispatch.
#[derive(Debug, Clone)]
pub struct ServiceEntry {
    /// The short logical key clients address (`<key>.<function>`)
    pub key: String,
    pub namespace: String,
    /// Alias map: externally visible function name → real method name
    pub contract: BTreeMap<String, String>,
    pub safe_name: String,
    service: ServiceImpl,
}

impl ServiceEntry {
    pub fn new(
        key: &str,
        namespace: &str,
        contract: BTreeMap<String, String>,
        service: ServiceImpl,
    ) -> Self {
        Self {
            key: key.to_string(),
            namespace: namespace.to_string(),
            contract,
            safe_name: safe_registry_name(key),
            service,
        }
    }

    /// Resolve an externally visible function name through the contract,
    /// then against the implementation.
    pub fn resolve(&self, func: &str) -> Option<&MethodSpec> {
        let name = self
            .contract
            .get(func)
            .map(String::as_str)
            .unwrap_or(func);
        self.service.method(name)
    }

    pub fn service(&self) -> &ServiceImpl {
        &self.service
    }

    /// The opaque metadata payload advertised under `serviceMetadata`.
    pub fn metadata_payload(&self) -> Value {
        let mut methods = serde_json::Map::new();
        for method in self.service.methods() {
            methods.insert(
                method.name.clone(),
                json!({
                    "params": serde_json::to_value(&method.params).unwrap_or(Value::Null)
                }),
            );
        }
        json!({
            "serviceKey": self.key,
            "methods": methods,
            "contract": self.contract,
        })
    }

    /// The flat metadata map sent with registration and heartbeats.
    pub fn metadata(&self) -> HashMap<String, String> {
        let mut metadata = HashMap::new();
        metadata.insert(
            "serviceMetadata".to_string(),
            self.metadata_payload().to_string(),
        );
        let description = if self.service.description.is_empty() {
            format!("berth service {}", self.key)
        } else {
            self.service.description.clone()
        };
        metadata.insert("description".to_string(), description);
        metadata
    }

    /// The registry-facing record for this identifier at `ip:port`.
    pub fn instance_record(&self, ip: &str, port: u16) -> InstanceRecord {
        InstanceRecord {
            service_name: self.safe_name.clone(),
            ip: ip.to_string(),
            port,
            namespace: self.namespace.clone(),
            metadata: self.metadata(),
            ephemeral: true,
        }
    }
}
