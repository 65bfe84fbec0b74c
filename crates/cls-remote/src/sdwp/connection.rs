use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{RemoteError, Result};
use crate::sdwp::packet::{HANDSHAKE, Packet, PacketReader, PacketWriter};
use crate::sdwp::value::{WireValue, decode_value, encode_value};
use crate::sdwp::{cmd, event};
use crate::transport::{
    DebugConnection, Introspector, ObjectId, RemoteValue, ThreadId, TrapId, TypeId, TypeRef,
};

const PROTOCOL_MAJOR: i32 = 2;
const PROTOCOL_MINOR: i32 = 29;

const SAFEPOINT_TYPE: &str = "UnityEditor.EditorApplication";
const SAFEPOINT_METHOD: &str = "Internal_CallUpdateFunctions";

/// Agent error: the VM is not suspended
const ERR_NOT_SUSPENDED: u16 = 101;

type MethodId = i64;
type FieldId = i64;

/// Events decoded from `Event/Composite` packets
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AgentEvent {
    Breakpoint { request_id: i32, thread: ThreadId },
    VmDeath,
}

/// Basic facts about a remote type
#[derive(Clone, Debug)]
struct TypeInfo {
    full_name: String,
    assembly: i64,
    base_type: Option<TypeId>,
}

/// Connection speaking the Mono soft debugger wire protocol
pub struct MonoConnection {
    writer: OwnedWriteHalf,
    packets: mpsc::UnboundedReceiver<io::Result<Packet>>,
    reader_task: JoinHandle<()>,
    next_id: u32,
    events: VecDeque<AgentEvent>,
    disconnected: bool,
    types: HashMap<String, TypeId>,
    type_infos: HashMap<TypeId, TypeInfo>,
    assembly_names: HashMap<i64, String>,
    methods: HashMap<(TypeId, String, Vec<String>), MethodId>,
    getters: HashMap<(TypeId, String), MethodId>,
    fields: HashMap<(TypeId, String), FieldId>,
    safepoint: Option<MethodId>,
}

impl MonoConnection {
    /// Open the TCP connection, handshake and negotiate the protocol version
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let mut stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;

        stream.write_all(HANDSHAKE).await?;
        let mut reply = [0u8; HANDSHAKE.len()];
        stream.read_exact(&mut reply).await?;
        if reply != HANDSHAKE {
            return Err(RemoteError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                "unexpected handshake from debugger agent",
            )));
        }

        let (mut read_half, writer) = stream.into_split();
        let (tx, packets) = mpsc::unbounded_channel();
        let reader_task = tokio::spawn(async move {
            loop {
                let packet = Packet::read_from(&mut read_half).await;
                let failed = packet.is_err();
                if tx.send(packet).is_err() || failed {
                    break;
                }
            }
        });

        let mut connection = Self {
            writer,
            packets,
            reader_task,
            next_id: 1,
            events: VecDeque::new(),
            disconnected: false,
            types: HashMap::new(),
            type_infos: HashMap::new(),
            assembly_names: HashMap::new(),
            methods: HashMap::new(),
            getters: HashMap::new(),
            fields: HashMap::new(),
            safepoint: None,
        };

        let version = connection.request(cmd::VM, cmd::VM_VERSION, Vec::new()).await?;
        let mut reader = PacketReader::new(&version);
        let vm_version = reader.string()?;
        let major = reader.i32()?;
        let minor = reader.i32()?;
        tracing::debug!(%addr, %vm_version, major, minor, "Debugger agent handshake complete");

        let data = PacketWriter::new()
            .i32(PROTOCOL_MAJOR)
            .i32(PROTOCOL_MINOR)
            .finish();
        connection
            .request(cmd::VM, cmd::VM_SET_PROTOCOL_VERSION, data)
            .await?;

        Ok(connection)
    }

    async fn next_packet(&mut self) -> Result<Packet> {
        match self.packets.recv().await {
            Some(Ok(packet)) => Ok(packet),
            Some(Err(e)) => {
                self.disconnected = true;
                Err(transport_error(e))
            }
            None => {
                self.disconnected = true;
                Err(RemoteError::RemoteDisconnected)
            }
        }
    }

    /// Queue events from an agent command packet
    fn accept_command(&mut self, command_set: u8, command: u8, data: &[u8]) {
        if (command_set, command) != (cmd::EVENT, cmd::EVENT_COMPOSITE) {
            tracing::debug!(command_set, command, "Ignoring agent command");
            return;
        }
        match parse_composite(data) {
            Ok(events) => self.events.extend(events),
            Err(e) => tracing::debug!(error = %e, "Ignoring undecodable event packet"),
        }
    }

    /// Send one command and wait for its reply
    async fn request(&mut self, command_set: u8, command: u8, data: Vec<u8>) -> Result<Vec<u8>> {
        self.request_raw(command_set, command, data)
            .await?
            .map_err(|code| {
                RemoteError::call_failed(format!(
                    "agent returned error {code} for command {command_set}/{command}"
                ))
            })
    }

    /// Like [`request`](Self::request) but hands back the agent error code
    async fn request_raw(
        &mut self,
        command_set: u8,
        command: u8,
        data: Vec<u8>,
    ) -> Result<std::result::Result<Vec<u8>, u16>> {
        if self.disconnected {
            return Err(RemoteError::RemoteDisconnected);
        }

        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        let packet = Packet::Command {
            id,
            command_set,
            command,
            data,
        };
        if let Err(e) = self.writer.write_all(&packet.encode()).await {
            self.disconnected = true;
            return Err(transport_error(e));
        }

        loop {
            match self.next_packet().await? {
                Packet::Reply {
                    id: reply_id,
                    error_code,
                    data,
                } if reply_id == id => {
                    return Ok(if error_code == 0 {
                        Ok(data)
                    } else {
                        Err(error_code)
                    });
                }
                // Reply to a request abandoned by cancellation
                Packet::Reply { .. } => {}
                Packet::Command {
                    command_set,
                    command,
                    data,
                    ..
                } => self.accept_command(command_set, command, &data),
            }
        }
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    /// Method the safepoint breakpoint is placed on, looked up once
    async fn safepoint_method(&mut self) -> Result<MethodId> {
        if let Some(method) = self.safepoint {
            return Ok(method);
        }
        let type_id = self.resolve_type(TypeRef::new(SAFEPOINT_TYPE)).await?;
        for candidate in self.method_ids(type_id).await? {
            if self.method_name(candidate).await? == SAFEPOINT_METHOD {
                self.safepoint = Some(candidate);
                return Ok(candidate);
            }
        }
        Err(RemoteError::call_failed(format!(
            "{SAFEPOINT_TYPE}.{SAFEPOINT_METHOD} not found"
        )))
    }

    async fn type_info(&mut self, ty: TypeId) -> Result<TypeInfo> {
        if let Some(info) = self.type_infos.get(&ty) {
            return Ok(info.clone());
        }
        let data = self
            .request(cmd::TYPE, cmd::TYPE_GET_INFO, PacketWriter::new().id(ty.0).finish())
            .await?;
        let mut reader = PacketReader::new(&data);
        let _namespace = reader.string()?;
        let _name = reader.string()?;
        let full_name = reader.string()?;
        let assembly = reader.id()?;
        let _module = reader.id()?;
        let base_type = Some(reader.id()?).filter(|id| *id != 0).map(TypeId);

        let info = TypeInfo {
            full_name,
            assembly,
            base_type,
        };
        self.type_infos.insert(ty, info.clone());
        Ok(info)
    }

    async fn assembly_name(&mut self, assembly: i64) -> Result<String> {
        if let Some(name) = self.assembly_names.get(&assembly) {
            return Ok(name.clone());
        }
        let data = self
            .request(cmd::ASSEMBLY, cmd::ASSEMBLY_GET_NAME, PacketWriter::new().id(assembly).finish())
            .await?;
        let full = PacketReader::new(&data).string()?;
        // "UnityEditor, Version=0.0.0.0, Culture=neutral, ..."
        let name = full.split(',').next().unwrap_or_default().trim().to_string();
        self.assembly_names.insert(assembly, name.clone());
        Ok(name)
    }

    async fn resolve_type(&mut self, ty: TypeRef<'_>) -> Result<TypeId> {
        let key = ty.to_string();
        if let Some(id) = self.types.get(&key) {
            return Ok(*id);
        }

        let data = PacketWriter::new().string(ty.name).u8(0).finish();
        let data = self.request(cmd::VM, cmd::VM_GET_TYPES, data).await?;
        let mut reader = PacketReader::new(&data);
        let count = reader.count()?;
        let candidates = (0..count)
            .map(|_| reader.id().map(TypeId))
            .collect::<Result<Vec<_>>>()?;

        let mut found = None;
        for candidate in candidates {
            match ty.assembly {
                None => {
                    found = Some(candidate);
                    break;
                }
                Some(wanted) => {
                    let info = self.type_info(candidate).await?;
                    if self.assembly_name(info.assembly).await? == wanted {
                        found = Some(candidate);
                        break;
                    }
                }
            }
        }

        let id = found.ok_or_else(|| RemoteError::call_failed(format!("type {ty} not loaded")))?;
        self.types.insert(key, id);
        Ok(id)
    }

    async fn method_ids(&mut self, ty: TypeId) -> Result<Vec<MethodId>> {
        let data = self
            .request(cmd::TYPE, cmd::TYPE_GET_METHODS, PacketWriter::new().id(ty.0).finish())
            .await?;
        let mut reader = PacketReader::new(&data);
        let count = reader.count()?;
        (0..count).map(|_| reader.id()).collect()
    }

    async fn method_name(&mut self, method: MethodId) -> Result<String> {
        let data = self
            .request(cmd::METHOD, cmd::METHOD_GET_NAME, PacketWriter::new().id(method).finish())
            .await?;
        PacketReader::new(&data).string()
    }

    async fn parameter_types(&mut self, method: MethodId) -> Result<Vec<String>> {
        let data = self
            .request(cmd::METHOD, cmd::METHOD_GET_PARAM_INFO, PacketWriter::new().id(method).finish())
            .await?;
        let mut reader = PacketReader::new(&data);
        let _call_convention = reader.i32()?;
        let param_count = reader.count()?;
        let _generic_param_count = reader.i32()?;
        let _return_type = reader.id()?;
        let param_types = (0..param_count)
            .map(|_| reader.id().map(TypeId))
            .collect::<Result<Vec<_>>>()?;

        let mut names = Vec::with_capacity(param_types.len());
        for param in param_types {
            names.push(self.type_info(param).await?.full_name);
        }
        Ok(names)
    }

    /// Find a method by name and parameter type names
    async fn resolve_method(&mut self, ty: TypeId, name: &str, arg_types: &[&str]) -> Result<MethodId> {
        let key = (
            ty,
            name.to_string(),
            arg_types.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
        );
        if let Some(id) = self.methods.get(&key) {
            return Ok(*id);
        }

        for method in self.method_ids(ty).await? {
            if self.method_name(method).await? != name {
                continue;
            }
            if self.parameter_types(method).await? == key.2 {
                self.methods.insert(key, method);
                return Ok(method);
            }
        }
        Err(RemoteError::call_failed(format!(
            "method {name}({}) not found",
            arg_types.join(", ")
        )))
    }

    async fn resolve_getter(&mut self, ty: TypeId, property: &str) -> Result<MethodId> {
        let key = (ty, property.to_string());
        if let Some(id) = self.getters.get(&key) {
            return Ok(*id);
        }

        let data = self
            .request(cmd::TYPE, cmd::TYPE_GET_PROPERTIES, PacketWriter::new().id(ty.0).finish())
            .await?;
        let mut reader = PacketReader::new(&data);
        let count = reader.count()?;
        for _ in 0..count {
            let _id = reader.id()?;
            let name = reader.string()?;
            let getter = reader.id()?;
            let _setter = reader.id()?;
            let _attributes = reader.i32()?;
            if name == property && getter != 0 {
                self.getters.insert(key, getter);
                return Ok(getter);
            }
        }
        Err(RemoteError::call_failed(format!("property {property} not found")))
    }

    /// Find a field on the type or one of its base types
    async fn resolve_field(&mut self, ty: TypeId, field: &str) -> Result<FieldId> {
        let key = (ty, field.to_string());
        if let Some(id) = self.fields.get(&key) {
            return Ok(*id);
        }

        let mut current = Some(ty);
        while let Some(owner) = current {
            let data = self
                .request(cmd::TYPE, cmd::TYPE_GET_FIELDS, PacketWriter::new().id(owner.0).finish())
                .await?;
            let mut reader = PacketReader::new(&data);
            let count = reader.count()?;
            for _ in 0..count {
                let id = reader.id()?;
                let name = reader.string()?;
                let _type = reader.id()?;
                let _attributes = reader.i32()?;
                if name == field {
                    self.fields.insert(key, id);
                    return Ok(id);
                }
            }
            current = self.type_info(owner).await?.base_type;
        }
        Err(RemoteError::call_failed(format!("field {field} not found")))
    }

    async fn object_type(&mut self, object: ObjectId) -> Result<TypeId> {
        let data = self
            .request(cmd::OBJECT_REF, cmd::OBJECT_REF_GET_TYPE, PacketWriter::new().id(object.0).finish())
            .await?;
        PacketReader::new(&data).id().map(TypeId)
    }

    async fn string_value(&mut self, object: ObjectId) -> Result<String> {
        let data = self
            .request(cmd::STRING_REF, cmd::STRING_REF_GET_VALUE, PacketWriter::new().id(object.0).finish())
            .await?;
        PacketReader::new(&data).string()
    }

    /// Turn a wire value into a [`RemoteValue`], fetching string contents
    fn resolve<'a>(&'a mut self, value: WireValue) -> BoxFuture<'a, Result<RemoteValue>> {
        Box::pin(async move {
            match value {
                WireValue::Plain(value) => Ok(value),
                WireValue::StringRef(id) => self.string_value(id).await.map(RemoteValue::Str),
                WireValue::Struct {
                    type_id,
                    is_enum,
                    fields,
                } => {
                    let mut resolved = Vec::with_capacity(fields.len());
                    for field in fields {
                        resolved.push(self.resolve(field).await?);
                    }
                    Ok(RemoteValue::Struct {
                        type_id,
                        is_enum,
                        fields: resolved,
                    })
                }
            }
        })
    }

    async fn invoke(
        &mut self,
        thread: ThreadId,
        method: MethodId,
        this: &RemoteValue,
        args: &[RemoteValue],
    ) -> Result<RemoteValue> {
        let mut writer = PacketWriter::new().id(thread.0).i32(0).id(method);
        writer = encode_value(writer, this)?;
        writer = writer.i32(args.len() as i32);
        for arg in args {
            writer = encode_value(writer, arg)?;
        }

        let data = self
            .request(cmd::VM, cmd::VM_INVOKE_METHOD, writer.finish())
            .await?;
        let mut reader = PacketReader::new(&data);
        let succeeded = reader.u8()? == 1;
        let value = decode_value(&mut reader)?;
        if !succeeded {
            let detail = match &value {
                WireValue::Plain(RemoteValue::Object(exception)) => {
                    let ty = self.object_type(*exception).await?;
                    self.type_info(ty).await?.full_name
                }
                _ => "unknown exception".to_string(),
            };
            return Err(RemoteError::call_failed(format!("invoked method threw {detail}")));
        }
        self.resolve(value).await
    }
}

impl Drop for MonoConnection {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

/// A closed or reset socket means the target went away
fn transport_error(e: io::Error) -> RemoteError {
    match e.kind() {
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe => RemoteError::RemoteDisconnected,
        _ => RemoteError::Io(e),
    }
}

/// Decode an `Event/Composite` payload, stopping at the first event kind
/// whose body is not understood
fn parse_composite(data: &[u8]) -> Result<Vec<AgentEvent>> {
    let mut reader = PacketReader::new(data);
    let _suspend_policy = reader.u8()?;
    let count = reader.count()?;
    let mut events = Vec::with_capacity(count);
    for _ in 0..count {
        let kind = reader.u8()?;
        let request_id = reader.i32()?;
        match kind {
            event::BREAKPOINT => {
                let thread = ThreadId(reader.id()?);
                let _method = reader.id()?;
                let _il_offset = reader.i64()?;
                events.push(AgentEvent::Breakpoint { request_id, thread });
            }
            event::VM_DEATH => events.push(AgentEvent::VmDeath),
            _ => break,
        }
    }
    Ok(events)
}

#[async_trait]
impl Introspector for MonoConnection {
    async fn get_static_property(
        &mut self,
        thread: ThreadId,
        ty: TypeRef<'_>,
        property: &str,
    ) -> Result<RemoteValue> {
        let type_id = self.resolve_type(ty).await?;
        let getter = self.resolve_getter(type_id, property).await?;
        self.invoke(thread, getter, &RemoteValue::Null, &[]).await
    }

    async fn call_static_method(
        &mut self,
        thread: ThreadId,
        ty: TypeRef<'_>,
        method: &str,
        arg_types: &[&str],
        args: &[RemoteValue],
    ) -> Result<RemoteValue> {
        let type_id = self.resolve_type(ty).await?;
        let method = self.resolve_method(type_id, method, arg_types).await?;
        self.invoke(thread, method, &RemoteValue::Null, args).await
    }

    async fn get_instance_field(
        &mut self,
        _thread: ThreadId,
        object: &RemoteValue,
        field: &str,
    ) -> Result<RemoteValue> {
        let object = object.as_object()?;
        let type_id = self.object_type(object).await?;
        let field_id = self.resolve_field(type_id, field).await?;

        let data = PacketWriter::new().id(object.0).i32(1).id(field_id).finish();
        let data = self
            .request(cmd::OBJECT_REF, cmd::OBJECT_REF_GET_VALUES, data)
            .await?;
        let value = decode_value(&mut PacketReader::new(&data))?;
        self.resolve(value).await
    }

    async fn construct_instance(&mut self, thread: ThreadId, ty: TypeRef<'_>) -> Result<RemoteValue> {
        let type_id = self.resolve_type(ty).await?;
        let ctor = self.resolve_method(type_id, ".ctor", &[]).await?;
        // A null receiver makes the agent allocate the object
        self.invoke(thread, ctor, &RemoteValue::Null, &[]).await
    }
}

#[async_trait]
impl DebugConnection for MonoConnection {
    async fn arm_safepoint(&mut self) -> Result<TrapId> {
        let method = self.safepoint_method().await?;

        let data = PacketWriter::new()
            .u8(event::BREAKPOINT)
            .u8(event::SUSPEND_ALL)
            .u8(1)
            .u8(event::MOD_LOCATION_ONLY)
            .id(method)
            .i64(0)
            .finish();
        let reply = self
            .request(cmd::EVENT_REQUEST, cmd::EVENT_REQUEST_SET, data)
            .await?;
        let request_id = PacketReader::new(&reply).i32()?;
        Ok(TrapId(i64::from(request_id)))
    }

    async fn poll_safepoint(&mut self, trap: TrapId, timeout: Duration) -> Result<Option<ThreadId>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            while let Some(event) = self.events.pop_front() {
                match event {
                    AgentEvent::Breakpoint { request_id, thread } if i64::from(request_id) == trap.0 => {
                        return Ok(Some(thread));
                    }
                    AgentEvent::Breakpoint { .. } => {}
                    AgentEvent::VmDeath => {
                        self.disconnected = true;
                        return Err(RemoteError::RemoteDisconnected);
                    }
                }
            }
            if self.disconnected {
                return Err(RemoteError::RemoteDisconnected);
            }

            let packet = match tokio::time::timeout_at(deadline, self.next_packet()).await {
                Ok(packet) => packet?,
                Err(_) => return Ok(None),
            };
            match packet {
                Packet::Command {
                    command_set,
                    command,
                    data,
                    ..
                } => self.accept_command(command_set, command, &data),
                Packet::Reply { .. } => {}
            }
        }
    }

    async fn disarm(&mut self, trap: TrapId) -> Result<()> {
        let data = PacketWriter::new()
            .u8(event::BREAKPOINT)
            .i32(trap.0 as i32)
            .finish();
        self.request(cmd::EVENT_REQUEST, cmd::EVENT_REQUEST_CLEAR, data)
            .await
            .map(|_| ())
    }

    async fn resume(&mut self) -> Result<()> {
        match self.request_raw(cmd::VM, cmd::VM_RESUME, Vec::new()).await? {
            Ok(_) | Err(ERR_NOT_SUSPENDED) => Ok(()),
            Err(code) => Err(RemoteError::call_failed(format!("resume failed with error {code}"))),
        }
    }

    async fn detach(&mut self) -> Result<()> {
        let result = self.request(cmd::VM, cmd::VM_DISPOSE, Vec::new()).await;
        let _ = self.writer.shutdown().await;
        self.disconnected = true;
        result.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_composite_breakpoint() {
        let data = PacketWriter::new()
            .u8(event::SUSPEND_ALL)
            .i32(1)
            .u8(event::BREAKPOINT)
            .i32(4)
            .id(77)
            .id(12)
            .i64(0)
            .finish();
        assert_eq!(
            parse_composite(&data).unwrap(),
            vec![AgentEvent::Breakpoint {
                request_id: 4,
                thread: ThreadId(77),
            }]
        );
    }

    #[test]
    fn test_socket_loss_is_disconnect() {
        let reset = io::Error::from(io::ErrorKind::ConnectionReset);
        assert!(matches!(transport_error(reset), RemoteError::RemoteDisconnected));
        let other = io::Error::from(io::ErrorKind::InvalidData);
        assert!(matches!(transport_error(other), RemoteError::Io(_)));
    }

    #[test]
    fn test_parse_composite_stops_at_unknown_kind() {
        let data = PacketWriter::new()
            .u8(0)
            .i32(2)
            .u8(event::VM_DEATH)
            .i32(0)
            .u8(42)
            .i32(0)
            .finish();
        assert_eq!(parse_composite(&data).unwrap(), vec![AgentEvent::VmDeath]);
    }
}
