use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use cls_types::Endpoint;

use crate::error::{RemoteError, Result};

/// Remote thread the agent reported as stopped at the safepoint
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ThreadId(pub i64);

/// Handle to an armed safepoint
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TrapId(pub i64);

/// Remote object handle; only valid while the target stays paused
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObjectId(pub i64);

/// Remote type handle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TypeId(pub i64);

/// Names a remote type, optionally qualified by its assembly
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TypeRef<'a> {
    pub assembly: Option<&'a str>,
    pub name: &'a str,
}

impl<'a> TypeRef<'a> {
    pub const fn new(name: &'a str) -> Self {
        Self {
            assembly: None,
            name,
        }
    }

    pub const fn in_assembly(assembly: &'a str, name: &'a str) -> Self {
        Self {
            assembly: Some(assembly),
            name,
        }
    }
}

impl fmt::Display for TypeRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.assembly {
            Some(assembly) => write!(f, "[{assembly}]{}", self.name),
            None => f.write_str(self.name),
        }
    }
}

/// A value read from, or passed to, the paused process
#[derive(Clone, Debug, PartialEq)]
pub enum RemoteValue {
    Null,
    Bool(bool),
    Char(u16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Str(String),
    Object(ObjectId),
    Type(TypeId),
    /// Value type or enum; enums carry their single underlying field
    Struct {
        type_id: TypeId,
        is_enum: bool,
        fields: Vec<RemoteValue>,
    },
}

impl RemoteValue {
    fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Char(_) => "char",
            Self::I32(_) => "int",
            Self::I64(_) => "long",
            Self::F32(_) => "float",
            Self::F64(_) => "double",
            Self::Str(_) => "string",
            Self::Object(_) => "object",
            Self::Type(_) => "type",
            Self::Struct { is_enum: true, .. } => "enum",
            Self::Struct { .. } => "struct",
        }
    }

    fn mismatch(&self, expected: &str) -> RemoteError {
        RemoteError::call_failed(format!("expected {expected}, got {}", self.kind()))
    }

    /// Integer value, unwrapping enums to their underlying number
    pub fn as_i32(&self) -> Result<i32> {
        match self {
            Self::I32(v) => Ok(*v),
            Self::Struct {
                is_enum: true,
                fields,
                ..
            } if fields.len() == 1 => fields[0].as_i32(),
            other => Err(other.mismatch("int")),
        }
    }

    pub fn as_bool(&self) -> Result<bool> {
        match self {
            Self::Bool(v) => Ok(*v),
            other => Err(other.mismatch("bool")),
        }
    }

    /// String value; a null reference reads as the empty string
    pub fn as_str(&self) -> Result<&str> {
        match self {
            Self::Str(v) => Ok(v),
            Self::Null => Ok(""),
            other => Err(other.mismatch("string")),
        }
    }

    pub fn into_string(self) -> Result<String> {
        match self {
            Self::Str(v) => Ok(v),
            Self::Null => Ok(String::new()),
            other => Err(other.mismatch("string")),
        }
    }

    pub fn as_object(&self) -> Result<ObjectId> {
        match self {
            Self::Object(id) => Ok(*id),
            other => Err(other.mismatch("object")),
        }
    }
}

/// Read-only access to the state of a paused process.
///
/// Every call executes on `thread`, the thread stopped at the safepoint.
#[async_trait]
pub trait Introspector: Send {
    async fn get_static_property(
        &mut self,
        thread: ThreadId,
        ty: TypeRef<'_>,
        property: &str,
    ) -> Result<RemoteValue>;

    /// Invoke a static method chosen by name and parameter type names
    async fn call_static_method(
        &mut self,
        thread: ThreadId,
        ty: TypeRef<'_>,
        method: &str,
        arg_types: &[&str],
        args: &[RemoteValue],
    ) -> Result<RemoteValue>;

    async fn get_instance_field(
        &mut self,
        thread: ThreadId,
        object: &RemoteValue,
        field: &str,
    ) -> Result<RemoteValue>;

    /// Allocate an instance through its parameterless constructor
    async fn construct_instance(&mut self, thread: ThreadId, ty: TypeRef<'_>) -> Result<RemoteValue>;
}

/// One live debugger connection to a target process
#[async_trait]
pub trait DebugConnection: Introspector {
    /// Arm a one-shot suspend-all trap at the editor main-loop safepoint
    async fn arm_safepoint(&mut self) -> Result<TrapId>;

    /// Wait up to `timeout` for the trap to fire
    async fn poll_safepoint(&mut self, trap: TrapId, timeout: Duration) -> Result<Option<ThreadId>>;

    async fn disarm(&mut self, trap: TrapId) -> Result<()>;

    /// Resume every suspended thread
    async fn resume(&mut self) -> Result<()>;

    /// Detach from the target, leaving it running
    async fn detach(&mut self) -> Result<()>;
}

/// Opens debugger connections
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn DebugConnection>>;
}
