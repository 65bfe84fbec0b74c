//! Mono soft debugger wire protocol client

mod connection;
mod packet;
mod value;

use async_trait::async_trait;
use cls_types::Endpoint;

pub use connection::MonoConnection;

use crate::error::Result;
use crate::transport::{Connector, DebugConnection};

pub(crate) mod cmd {
    pub const VM: u8 = 1;
    pub const VM_VERSION: u8 = 1;
    pub const VM_RESUME: u8 = 4;
    pub const VM_DISPOSE: u8 = 6;
    pub const VM_INVOKE_METHOD: u8 = 7;
    pub const VM_SET_PROTOCOL_VERSION: u8 = 8;
    pub const VM_GET_TYPES: u8 = 12;

    pub const OBJECT_REF: u8 = 9;
    pub const OBJECT_REF_GET_TYPE: u8 = 1;
    pub const OBJECT_REF_GET_VALUES: u8 = 2;

    pub const STRING_REF: u8 = 10;
    pub const STRING_REF_GET_VALUE: u8 = 1;

    pub const EVENT_REQUEST: u8 = 15;
    pub const EVENT_REQUEST_SET: u8 = 1;
    pub const EVENT_REQUEST_CLEAR: u8 = 2;

    pub const ASSEMBLY: u8 = 21;
    pub const ASSEMBLY_GET_NAME: u8 = 5;

    pub const METHOD: u8 = 22;
    pub const METHOD_GET_NAME: u8 = 1;
    pub const METHOD_GET_PARAM_INFO: u8 = 4;

    pub const TYPE: u8 = 23;
    pub const TYPE_GET_INFO: u8 = 1;
    pub const TYPE_GET_METHODS: u8 = 2;
    pub const TYPE_GET_FIELDS: u8 = 3;
    pub const TYPE_GET_PROPERTIES: u8 = 9;

    pub const EVENT: u8 = 64;
    pub const EVENT_COMPOSITE: u8 = 100;
}

pub(crate) mod event {
    pub const VM_DEATH: u8 = 1;
    pub const BREAKPOINT: u8 = 10;
    pub const SUSPEND_ALL: u8 = 2;
    pub const MOD_LOCATION_ONLY: u8 = 7;
}

/// Opens [`MonoConnection`]s over TCP
#[derive(Clone, Copy, Debug, Default)]
pub struct MonoConnector;

#[async_trait]
impl Connector for MonoConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn DebugConnection>> {
        tracing::debug!(%endpoint, "Opening debugger connection");
        let connection = MonoConnection::connect(endpoint.socket_addr()).await?;
        Ok(Box::new(connection))
    }
}
