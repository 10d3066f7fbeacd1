use serde_json::Value;

/// The root node of a YANG model in the running datastore.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ModelRef {
    /// `<prefix>-<nfId>`.
    pub prefix: String,
    pub root: String,
    pub kind: RootKind,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RootKind {
    Container,
    List,
}

/// Access to the configuration datastore fronting the YANG models.
#[async_trait::async_trait]
pub trait SchemaGateway: Send + Sync {
    /// Reads the running configuration under `model`. Returns `None` when the
    /// datastore holds no entries for it.
    async fn fetch_current(&self, model: &ModelRef) -> anyhow::Result<Option<Value>>;

    /// Reads the running configuration under `model` as an XML document.
    async fn fetch_current_xml(&self, model: &ModelRef) -> anyhow::Result<Option<String>>;

    async fn push(&self, model: &ModelRef, payload: &Value) -> anyhow::Result<()>;
}

// === impl ModelRef ===

impl ModelRef {
    /// The datastore path of the model root, e.g. `amf-nf1:config`.
    pub fn path(&self) -> String {
        format!("{}:{}", self.prefix, self.root)
    }
}
