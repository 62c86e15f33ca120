// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Production engines backed by the `opcua` crate.
//!
//! Enabled with the `real-transport` feature. The loopback engines in
//! [`super::memory`] stay the default for tests; these implementations wire
//! the same traits to a real OPC-UA stack.
//!
//! Secure contexts hand their certificate material to the stack through a
//! PKI directory: the blobs loaded at context creation are written under
//! `<pki_dir>/own`, `<pki_dir>/private` and `<pki_dir>/trusted` before the
//! client or server is built.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;

use opcua::client::prelude::{
    ClientBuilder, ConnectionStatusCallback, DataChangeCallback, IdentityToken,
    MonitoredItemService, Session, SessionCommand, SubscriptionService, ViewService,
};
use opcua::server::prelude::{
    AttrFnGetter, Server, ServerBuilder, ServerEndpoint, VariableBuilder,
    ANONYMOUS_USER_TOKEN_ID,
};
use opcua::sync::RwLock as OpcUaRwLock;

use super::{
    BrowseNode, ClientEngine, ClientEngineConfig, ClientState, EngineFactory,
    MonitoredItemRequest, MonitoredItemResult, PayloadSource, ServerEngine, ServerEngineConfig,
    StatusCode, ValueChange,
};
use crate::security::SecurityMode;

// =============================================================================
// RealEngineFactory
// =============================================================================

/// Builds `opcua`-crate engines sharing one PKI directory.
pub struct RealEngineFactory {
    pki_dir: PathBuf,
}

impl RealEngineFactory {
    /// Creates a factory storing certificate material under `pki_dir`.
    pub fn new(pki_dir: impl Into<PathBuf>) -> Self {
        Self {
            pki_dir: pki_dir.into(),
        }
    }
}

impl EngineFactory for RealEngineFactory {
    fn server_engine(&self) -> Box<dyn ServerEngine> {
        Box::new(RealServerEngine {
            pki_dir: self.pki_dir.clone(),
            config: None,
            server: None,
            namespaces: HashMap::new(),
            run_handle: None,
        })
    }

    fn client_engine(&self) -> Box<dyn ClientEngine> {
        Box::new(RealClientEngine {
            pki_dir: self.pki_dir.clone(),
            config: None,
            session: None,
            session_stop: None,
            pending: Arc::new(SyncMutex::new(Vec::new())),
            connected: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        })
    }
}

/// Writes the context's certificate material into the PKI layout the
/// `opcua` crate expects.
fn materialize_pki(
    pki_dir: &std::path::Path,
    security: &crate::security::SecurityArtifacts,
) -> Result<(), StatusCode> {
    if !security.is_secure() {
        return Ok(());
    }
    let write = |dir: &str, name: &str, bytes: &[u8]| -> Result<(), StatusCode> {
        let dir = pki_dir.join(dir);
        std::fs::create_dir_all(&dir).map_err(|_| StatusCode::BAD_CONFIGURATION_ERROR)?;
        std::fs::write(dir.join(name), bytes).map_err(|_| StatusCode::BAD_CONFIGURATION_ERROR)
    };
    write("own", "cert.der", &security.certificate)?;
    write("private", "private.pem", &security.private_key)?;
    for (index, blob) in security.trust_list.iter().enumerate() {
        write("trusted", &format!("trusted-{index}.der"), blob)?;
    }
    Ok(())
}

// =============================================================================
// RealServerEngine
// =============================================================================

/// Publisher-side engine running an embedded `opcua` server.
pub struct RealServerEngine {
    pki_dir: PathBuf,
    config: Option<ServerEngineConfig>,
    server: Option<Arc<OpcUaRwLock<Server>>>,
    namespaces: HashMap<String, u16>,
    run_handle: Option<std::thread::JoinHandle<()>>,
}

#[async_trait]
impl ServerEngine for RealServerEngine {
    async fn configure(&mut self, config: &ServerEngineConfig) -> Result<(), StatusCode> {
        materialize_pki(&self.pki_dir, &config.security)?;
        self.config = Some(config.clone());
        Ok(())
    }

    async fn startup(&mut self) -> Result<(), StatusCode> {
        let config = self
            .config
            .as_ref()
            .ok_or(StatusCode::BAD_CONFIGURATION_ERROR)?;

        let mut builder = ServerBuilder::new()
            .application_name("databus publisher")
            .application_uri("urn:databus:publisher")
            .host_and_port(&config.hostname, config.port)
            .pki_dir(self.pki_dir.clone())
            .discovery_urls(vec![format!(
                "opc.tcp://{}:{}/",
                config.hostname, config.port
            )]);

        builder = match config.security.mode {
            SecurityMode::None => builder
                .create_sample_keypair(true)
                .endpoint(
                    "none",
                    ServerEndpoint::new_none(
                        "/",
                        &[ANONYMOUS_USER_TOKEN_ID.into()],
                    ),
                ),
            SecurityMode::SignAndEncrypt => builder.trust_client_certs().endpoint(
                "basic256sha256_sign_encrypt",
                ServerEndpoint::new_basic256sha256_sign_encrypt(
                    "/",
                    &[ANONYMOUS_USER_TOKEN_ID.into()],
                ),
            ),
        };

        let server = builder.server().ok_or(StatusCode::BAD_CONFIGURATION_ERROR)?;
        let server = Arc::new(OpcUaRwLock::new(server));
        self.server = Some(Arc::clone(&server));

        // The opcua server drives its own socket loop; the bus's server
        // loop only provides pacing on top of it.
        self.run_handle = Some(std::thread::spawn(move || {
            Server::run_server(server);
        }));

        tracing::info!(
            host = %config.hostname,
            port = config.port,
            "Embedded OPC-UA server started"
        );
        Ok(())
    }

    async fn iterate(&mut self) -> Duration {
        self.config
            .as_ref()
            .map(|c| c.interval_limits.max)
            .unwrap_or(Duration::from_millis(10))
    }

    async fn shutdown(&mut self) {
        if let Some(server) = self.server.take() {
            server.write().abort();
        }
        if let Some(handle) = self.run_handle.take() {
            let _ = handle.join();
        }
        self.namespaces.clear();
    }

    async fn find_namespace(&mut self, namespace: &str) -> Option<u16> {
        self.namespaces.get(namespace).copied()
    }

    async fn add_namespace(&mut self, namespace: &str) -> Result<u16, StatusCode> {
        let server = self.server.as_ref().ok_or(StatusCode::BAD_SERVER_HALTED)?;
        let address_space = server.read().address_space();
        let index = {
            let mut address_space = address_space.write();
            address_space
                .register_namespace(namespace)
                .map_err(|_| StatusCode::BAD_INTERNAL_ERROR)?
        };
        self.namespaces.insert(namespace.to_string(), index);
        Ok(index)
    }

    async fn add_data_source_node(
        &mut self,
        namespace_index: u16,
        identifier: &str,
        source: PayloadSource,
    ) -> StatusCode {
        use opcua::types::{DataValue, NodeId as UaNodeId, ObjectId, Variant};

        let Some(server) = self.server.as_ref() else {
            return StatusCode::BAD_SERVER_HALTED;
        };
        let node_id = UaNodeId::new(namespace_index, identifier);
        let address_space = server.read().address_space();
        let mut address_space = address_space.write();

        if address_space.find_node(&node_id).is_some() {
            return StatusCode::BAD_NODE_ID_EXISTS;
        }

        // Reads serve the last published payload; writes from the bus side
        // are accepted by the stack and simply overwritten next publish.
        let getter = AttrFnGetter::new_boxed(
            move |_node, _timestamps, _attribute, _index_range, _encoding, _max_age| {
                Ok(Some(DataValue::new_now(Variant::from(source.read()))))
            },
        );

        let built = VariableBuilder::new(&node_id, identifier, identifier)
            .organized_by(ObjectId::ObjectsFolder)
            .value(Variant::from(""))
            .value_getter(getter)
            .writable()
            .insert(&mut address_space);

        if built {
            StatusCode::GOOD
        } else {
            StatusCode::BAD_INTERNAL_ERROR
        }
    }

    async fn write_value(
        &mut self,
        namespace_index: u16,
        identifier: &str,
        payload: &str,
    ) -> StatusCode {
        use opcua::types::{DateTime as UaDateTime, NodeId as UaNodeId, Variant};

        let Some(server) = self.server.as_ref() else {
            return StatusCode::BAD_SERVER_HALTED;
        };
        let node_id = UaNodeId::new(namespace_index, identifier);
        let now = UaDateTime::now();
        let address_space = server.read().address_space();
        let mut address_space = address_space.write();
        if address_space.set_variable_value(node_id, Variant::from(payload), &now, &now) {
            StatusCode::GOOD
        } else {
            StatusCode::BAD_NODE_ID_UNKNOWN
        }
    }
}

// =============================================================================
// RealClientEngine
// =============================================================================

/// Subscriber-side engine wrapping an `opcua` client session.
pub struct RealClientEngine {
    pki_dir: PathBuf,
    config: Option<ClientEngineConfig>,
    session: Option<Arc<OpcUaRwLock<Session>>>,
    session_stop: Option<tokio::sync::oneshot::Sender<SessionCommand>>,
    /// Notifications queued by the data-change callback.
    pending: Arc<SyncMutex<Vec<ValueChange>>>,
    connected: Arc<std::sync::atomic::AtomicBool>,
}

impl RealClientEngine {
    fn session(&self) -> Result<Arc<OpcUaRwLock<Session>>, StatusCode> {
        self.session
            .clone()
            .ok_or(StatusCode::BAD_SERVER_NOT_CONNECTED)
    }
}

#[async_trait]
impl ClientEngine for RealClientEngine {
    async fn configure(&mut self, config: &ClientEngineConfig) -> Result<(), StatusCode> {
        materialize_pki(&self.pki_dir, &config.security)?;
        self.config = Some(config.clone());
        Ok(())
    }

    async fn connect(&mut self) -> StatusCode {
        use opcua::client::prelude::SecurityPolicy;
        use opcua::types::MessageSecurityMode;

        let Some(config) = self.config.clone() else {
            return StatusCode::BAD_CONFIGURATION_ERROR;
        };

        let mut builder = ClientBuilder::new()
            .application_name("databus subscriber")
            .application_uri("urn:databus:subscriber")
            .pki_dir(self.pki_dir.clone())
            .session_retry_limit(0)
            .session_timeout(config.connect_timeout.as_millis() as u32);
        if config.security.mode == SecurityMode::None {
            builder = builder.trust_server_certs(true);
        }

        let Some(mut client) = builder.client() else {
            return StatusCode::BAD_CONFIGURATION_ERROR;
        };

        let (policy, mode) = match config.security.mode {
            SecurityMode::None => (SecurityPolicy::None, MessageSecurityMode::None),
            SecurityMode::SignAndEncrypt => (
                SecurityPolicy::Basic256Sha256,
                MessageSecurityMode::SignAndEncrypt,
            ),
        };

        let endpoints = match client.get_server_endpoints_from_url(&config.endpoint) {
            Ok(endpoints) => endpoints,
            Err(status) => return StatusCode(status.bits()),
        };
        let Some(endpoint) = endpoints
            .iter()
            .find(|e| e.security_policy_uri.as_ref() == policy.to_uri() && e.security_mode == mode)
            .cloned()
        else {
            return StatusCode::BAD_CONNECTION_REJECTED;
        };

        let session = match client.connect_to_endpoint(endpoint, IdentityToken::Anonymous) {
            Ok(session) => session,
            Err(status) => return StatusCode(status.bits()),
        };

        // Track the transport state through the session's own callback.
        {
            let connected = Arc::clone(&self.connected);
            let mut session_locked = session.write();
            session_locked.set_connection_status_callback(
                ConnectionStatusCallback::new(move |is_connected| {
                    connected.store(is_connected, std::sync::atomic::Ordering::Release);
                }),
            );
        }
        self.connected
            .store(true, std::sync::atomic::Ordering::Release);

        // The session runs on its own task; run_iterate only drains the
        // callback queue.
        self.session_stop = Some(Session::run_async(Arc::clone(&session)));
        self.session = Some(session);

        tracing::info!(endpoint = %config.endpoint, "Connected to OPC-UA server");
        StatusCode::GOOD
    }

    async fn disconnect(&mut self) {
        if let Some(stop) = self.session_stop.take() {
            let _ = stop.send(SessionCommand::Stop);
        }
        if let Some(session) = self.session.take() {
            session.read().disconnect();
        }
        self.connected
            .store(false, std::sync::atomic::Ordering::Release);
        self.pending.lock().clear();
    }

    fn state(&self) -> ClientState {
        if self.session.is_none() {
            return ClientState::Disconnected;
        }
        if self.connected.load(std::sync::atomic::Ordering::Acquire) {
            ClientState::Session
        } else {
            ClientState::Disconnected
        }
    }

    async fn browse_objects(&mut self) -> Result<Vec<BrowseNode>, StatusCode> {
        use opcua::types::{
            BrowseDescription, BrowseDescriptionResultMask, BrowseDirection, Identifier, ObjectId,
            ReferenceTypeId,
        };

        let session = self.session()?;
        let browse_description = BrowseDescription {
            node_id: ObjectId::ObjectsFolder.into(),
            browse_direction: BrowseDirection::Forward,
            reference_type_id: ReferenceTypeId::HierarchicalReferences.into(),
            include_subtypes: true,
            node_class_mask: 0,
            result_mask: BrowseDescriptionResultMask::all().bits(),
        };

        let session_locked = session.read();
        let results = session_locked
            .browse(&[browse_description])
            .map_err(|status| StatusCode(status.bits()))?
            .unwrap_or_default();

        let mut nodes = Vec::new();
        for result in &results {
            if let Some(ref references) = result.references {
                for reference in references {
                    if let Identifier::String(ref identifier) =
                        reference.node_id.node_id.identifier
                    {
                        nodes.push(BrowseNode {
                            namespace_index: reference.node_id.node_id.namespace,
                            identifier: identifier.as_ref().to_string(),
                        });
                    }
                }
            }
        }
        Ok(nodes)
    }

    async fn create_subscription(
        &mut self,
        publishing_interval: Duration,
    ) -> Result<u32, StatusCode> {
        let session = self.session()?;
        let pending = Arc::clone(&self.pending);

        let session_locked = session.read();
        session_locked
            .create_subscription(
                publishing_interval.as_millis() as f64,
                60,
                10,
                65535,
                0,
                true,
                DataChangeCallback::new(move |changed_items| {
                    let mut queue = pending.lock();
                    for item in changed_items {
                        if let Some(opcua::types::Variant::String(ref value)) =
                            item.last_value().value
                        {
                            queue.push(ValueChange::new(item.id(), value.as_ref()));
                        }
                    }
                }),
            )
            .map_err(|status| StatusCode(status.bits()))
    }

    async fn delete_subscription(&mut self, subscription_id: u32) -> StatusCode {
        let Ok(session) = self.session() else {
            return StatusCode::BAD_SERVER_NOT_CONNECTED;
        };
        let session_locked = session.read();
        match session_locked.delete_subscription(subscription_id) {
            Ok(_) => StatusCode::GOOD,
            Err(status) => StatusCode(status.bits()),
        }
    }

    async fn create_monitored_items(
        &mut self,
        subscription_id: u32,
        items: &[MonitoredItemRequest],
    ) -> Result<Vec<MonitoredItemResult>, StatusCode> {
        use opcua::types::{
            AttributeId, ExtensionObject, MonitoredItemCreateRequest, MonitoringMode,
            MonitoringParameters, NodeId as UaNodeId, QualifiedName, ReadValueId,
            TimestampsToReturn, UAString,
        };

        let session = self.session()?;
        let requests: Vec<MonitoredItemCreateRequest> = items
            .iter()
            .map(|item| MonitoredItemCreateRequest {
                item_to_monitor: ReadValueId {
                    node_id: UaNodeId::new(item.namespace_index, item.identifier.as_str()),
                    attribute_id: AttributeId::Value as u32,
                    index_range: UAString::null(),
                    data_encoding: QualifiedName::null(),
                },
                monitoring_mode: MonitoringMode::Reporting,
                requested_parameters: MonitoringParameters {
                    sampling_interval: 0.0,
                    filter: ExtensionObject::null(),
                    queue_size: 10,
                    discard_oldest: true,
                    client_handle: 0,
                },
            })
            .collect();

        let session_locked = session.read();
        let results = session_locked
            .create_monitored_items(subscription_id, TimestampsToReturn::Both, &requests)
            .map_err(|status| StatusCode(status.bits()))?;

        Ok(results
            .iter()
            .map(|result| MonitoredItemResult {
                monitored_item_id: result.monitored_item_id,
                status: StatusCode(result.status_code.bits()),
            })
            .collect())
    }

    async fn run_iterate(&mut self, timeout: Duration) -> Vec<ValueChange> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            {
                let mut queue = self.pending.lock();
                if !queue.is_empty() {
                    return std::mem::take(&mut *queue);
                }
            }
            if !self.connected.load(std::sync::atomic::Ordering::Acquire)
                || tokio::time::Instant::now() >= deadline
            {
                return Vec::new();
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
