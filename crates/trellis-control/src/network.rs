//! The network controller
//!
//! Owns the live topology, the circuit table, and the control loop that
//! serializes topology mutation. Connection handlers call into this type;
//! anything that blocks (circuit creation's route rendezvous) must be
//! spawned off the receive path by the caller.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};

use trellis_core::{
    CircuitId, ConfigError, DialPayload, EntityError, FabricError, FaultPayload, FaultSubject,
    IdGenerator, LinkId, Message, RouteError, RouterId, ServiceId, TerminatorId, UnroutePayload,
    message::content,
};
use trellis_routing::{EgressSpec, Path, PathEngine, create_route_messages};
use trellis_store::{RouterRecord, ServiceRecord, Stores, TerminatorRecord};
use trellis_strategy::{CostTable, CostedTerminator, LowestCostStrategy, TerminatorStrategy};
use trellis_topology::{Link, LinkController, LinkMode, LinkState, Router, RouterRegistry};

use crate::circuit::{Circuit, CircuitTable};
use crate::events::{EventBus, NetworkEvent};
use crate::options::NetworkOptions;
use crate::route_sender::{RouteSenderRegistry, RouteStatus};

/// Receive halves handed to the control loop on its first run.
struct LoopReceivers {
    router_changed: mpsc::Receiver<RouterId>,
    link_changed: mpsc::Receiver<LinkId>,
    shutdown: watch::Receiver<bool>,
}

pub struct Network {
    options: NetworkOptions,
    stores: Arc<Stores>,
    routers: Arc<RouterRegistry>,
    links: Arc<LinkController>,
    path_engine: PathEngine,
    circuits: CircuitTable,
    route_senders: RouteSenderRegistry,
    costs: Arc<CostTable>,
    strategy: Arc<dyn TerminatorStrategy>,
    events: EventBus,
    id_generator: IdGenerator,
    router_changed_tx: mpsc::Sender<RouterId>,
    link_changed_tx: mpsc::Sender<LinkId>,
    loop_receivers: std::sync::Mutex<Option<LoopReceivers>>,
    shutdown_tx: watch::Sender<bool>,
    is_shutdown: AtomicBool,
}

impl Network {
    /// Build a controller with the default lowest-cost terminator strategy.
    pub fn new(options: NetworkOptions) -> Result<Self, ConfigError> {
        let costs = Arc::new(CostTable::new());
        let strategy = Arc::new(LowestCostStrategy::new(costs.clone()));
        Self::with_strategy(options, costs, strategy)
    }

    /// Build a controller around an injected cost table and strategy.
    pub fn with_strategy(
        options: NetworkOptions,
        costs: Arc<CostTable>,
        strategy: Arc<dyn TerminatorStrategy>,
    ) -> Result<Self, ConfigError> {
        options.validate()?;

        let routers = Arc::new(RouterRegistry::new());
        let links = Arc::new(LinkController::new());
        let (router_changed_tx, router_changed_rx) = mpsc::channel(options.event_queue_capacity);
        let (link_changed_tx, link_changed_rx) = mpsc::channel(options.event_queue_capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            path_engine: PathEngine::new(routers.clone(), links.clone()),
            events: EventBus::new(options.event_queue_capacity),
            options,
            stores: Arc::new(Stores::new()),
            routers,
            links,
            circuits: CircuitTable::new(),
            route_senders: RouteSenderRegistry::new(),
            costs,
            strategy,
            id_generator: IdGenerator::new(),
            router_changed_tx,
            link_changed_tx,
            loop_receivers: std::sync::Mutex::new(Some(LoopReceivers {
                router_changed: router_changed_rx,
                link_changed: link_changed_rx,
                shutdown: shutdown_rx,
            })),
            shutdown_tx,
            is_shutdown: AtomicBool::new(false),
        })
    }

    pub fn options(&self) -> &NetworkOptions {
        &self.options
    }

    pub(crate) fn path_engine(&self) -> &PathEngine {
        &self.path_engine
    }

    pub fn stores(&self) -> &Arc<Stores> {
        &self.stores
    }

    pub fn costs(&self) -> &Arc<CostTable> {
        &self.costs
    }

    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<NetworkEvent> {
        self.events.subscribe()
    }

    // -- topology queries ---------------------------------------------------

    pub fn connected_router(&self, id: &RouterId) -> bool {
        self.routers.is_connected(id)
    }

    pub fn get_connected_router(&self, id: &RouterId) -> Option<Arc<Router>> {
        self.routers.get_connected(id)
    }

    pub fn all_connected_routers(&self) -> Vec<Arc<Router>> {
        self.routers.all_connected()
    }

    pub fn get_link(&self, id: &LinkId) -> Option<Arc<Link>> {
        self.links.get(id)
    }

    /// Register a link in the live topology. Links normally enter through
    /// assembly's proposals; this is the seam for links reported directly
    /// by routers and for administrative seeding.
    pub fn add_link(&self, link: Arc<Link>) {
        self.links.add(link);
    }

    pub fn all_links(&self) -> Vec<Arc<Link>> {
        self.links.all()
    }

    pub fn links_for_router(&self, id: &RouterId) -> Vec<Arc<Link>> {
        self.links.links_for_router(id)
    }

    pub fn get_circuit(&self, id: &CircuitId) -> Option<Arc<Circuit>> {
        self.circuits.get(id)
    }

    pub fn all_circuits(&self) -> Vec<Arc<Circuit>> {
        self.circuits.all()
    }

    // -- entity administration ----------------------------------------------

    /// Persist a router record; called when a router first authenticates.
    pub fn create_router(&self, router: RouterRecord) -> Result<(), FabricError> {
        self.stores.routers.create(router)?;
        Ok(())
    }

    /// Administrative deletion of a router record. Live connectivity is
    /// handled separately through [`disconnect_router`](Network::disconnect_router).
    pub fn delete_router(&self, id: &RouterId) -> Result<(), FabricError> {
        self.stores.routers.delete(id.as_str())?;
        Ok(())
    }

    pub fn create_service(&self, service: ServiceRecord) -> Result<(), FabricError> {
        self.stores.services.create(service)?;
        Ok(())
    }

    pub fn create_terminator(&self, terminator: TerminatorRecord) -> Result<(), FabricError> {
        self.stores.terminators.create(terminator)?;
        Ok(())
    }

    /// Delete a terminator record and forget its transient cost state.
    pub fn delete_terminator(&self, id: &TerminatorId) -> Result<(), FabricError> {
        self.stores.terminators.delete(id.as_str())?;
        self.costs.clear(id);
        Ok(())
    }

    // -- connectivity -------------------------------------------------------

    /// A router finished authenticating; bring it into the live topology.
    pub async fn connect_router(&self, router: Arc<Router>) {
        info!(router = %router.id, "router connected");
        self.routers.mark_connected(router.clone());
        self.events.publish(NetworkEvent::RouterConnected {
            router: router.id.clone(),
            timestamp: Utc::now(),
        });
        self.router_changed(&router.id).await;
    }

    /// A router's control channel dropped; remove it and every incident
    /// link, notifying the control loop per removed link.
    pub async fn disconnect_router(&self, router: &Router) {
        info!(router = %router.id, "router disconnected");
        for link in self.links.links_for_router(&router.id) {
            self.links.remove(&link);
            self.link_changed(&link.id);
        }
        self.routers.mark_disconnected(router);
        self.events.publish(NetworkEvent::RouterDisconnected {
            router: router.id.clone(),
            timestamp: Utc::now(),
        });
        self.router_changed(&router.id).await;
    }

    async fn router_changed(&self, router_id: &RouterId) {
        if self.router_changed_tx.send(router_id.clone()).await.is_err() {
            warn!(router = %router_id, "control loop gone, dropping router change");
        }
    }

    /// Relay a link-change notification to the control loop.
    ///
    /// Called from connection receive paths, so it never blocks: when the
    /// queue is full the notification is dropped with a warning, and the
    /// next periodic sweep coalesces whatever was missed.
    pub fn link_changed(&self, link_id: &LinkId) {
        match self.link_changed_tx.try_send(link_id.clone()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(id)) => {
                warn!(link = %id, "link-change queue full, dropping notification");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    /// Record a link coming up or failing, from a router's report.
    pub fn link_connected(&self, link_id: &LinkId, connected: bool) -> Result<(), FabricError> {
        let link = self
            .links
            .get(link_id)
            .ok_or_else(|| EntityError::invalid("link", link_id.as_str()))?;
        if connected {
            link.add_state(LinkState::new(LinkMode::Connected));
            info!(link = %link_id, "link connected");
        } else {
            link.add_state(LinkState::new(LinkMode::Failed));
            info!(link = %link_id, "link failed");
        }
        Ok(())
    }

    /// Handle a fault report from a router.
    pub async fn handle_fault(&self, fault: FaultPayload) {
        match fault.subject {
            FaultSubject::Link => {
                let link_id = LinkId::new(fault.id);
                if self.link_connected(&link_id, false).is_ok() {
                    self.link_changed(&link_id);
                    info!(link = %link_id, "link fault");
                }
            }
            FaultSubject::Ingress | FaultSubject::Egress => {
                let circuit_id = CircuitId::new(fault.id);
                match self.remove_circuit(&circuit_id, false).await {
                    Ok(()) => debug!(circuit = %circuit_id, "handled endpoint fault"),
                    Err(FabricError::Entity(EntityError::InvalidCircuit(_))) => {
                        debug!(circuit = %circuit_id, "endpoint fault for unknown circuit");
                    }
                    Err(err) => {
                        error!(circuit = %circuit_id, error = %err, "error handling endpoint fault");
                    }
                }
            }
        }
    }

    /// Fold a latency measurement from `router_id` into the link's
    /// direction it measured.
    pub fn apply_latency_report(&self, router_id: &RouterId, link_id: &LinkId, latency: i64) {
        let Some(link) = self.links.get(link_id) else {
            return;
        };
        if &link.src.id == router_id {
            link.set_src_latency(latency);
        } else if &link.dst.id == router_id {
            link.set_dst_latency(latency);
        } else {
            warn!(link = %link_id, router = %router_id, "latency report from non-endpoint");
        }
    }

    /// Deliver an inbound route acknowledgement to its waiting circuit.
    pub fn route_result_received(&self, status: RouteStatus) -> bool {
        self.route_senders.forward_route_result(status)
    }

    // -- circuit lifecycle --------------------------------------------------

    /// Establish a circuit from `ingress` to a terminator of `service_id`.
    ///
    /// Blocks on the route rendezvous for up to the configured timeout per
    /// attempt; callers on a connection receive path must spawn this.
    /// On failure no circuit is registered and every hop that acknowledged
    /// is sent an unroute.
    pub async fn create_circuit(
        &self,
        ingress: &Arc<Router>,
        client_id: &str,
        service_id: &ServiceId,
    ) -> Result<Arc<Circuit>, FabricError> {
        let service = self
            .stores
            .services
            .read(service_id.as_str())
            .map_err(|_| EntityError::invalid("service", service_id.as_str()))?;

        let circuit_id = self.circuits.next_circuit_id();
        let attempts = self.options.create_circuit_retries.max(1);
        let result = self
            .route_circuit(&circuit_id, ingress, client_id, &service, attempts)
            .await;
        self.route_senders.remove(&circuit_id);
        result
    }

    async fn route_circuit(
        &self,
        circuit_id: &CircuitId,
        ingress: &Arc<Router>,
        client_id: &str,
        service: &ServiceRecord,
        attempts: u32,
    ) -> Result<Arc<Circuit>, FabricError> {
        let mut last_err = RouteError::Timeout {
            circuit_id: circuit_id.clone(),
        };

        for attempt in 0..attempts {
            let candidates = self.costed_terminators(ingress, &service.id)?;
            let chosen = self
                .strategy
                .select(&candidates)
                .ok_or_else(|| EntityError::invalid("terminator", service.id.as_str()))?;
            let egress_router = self
                .routers
                .get_connected(&chosen.record.router)
                .ok_or_else(|| {
                    EntityError::invalid("terminating router", chosen.record.router.as_str())
                })?;

            let path = Arc::new(self.path_engine.create_path(
                ingress,
                &egress_router,
                self.id_generator.next_id(),
                self.id_generator.next_id(),
            )?);
            let spec = EgressSpec {
                binding: chosen.record.effective_binding().to_string(),
                address: chosen.record.address.clone(),
                peer_data: chosen.record.peer_data.clone(),
            };
            let route_msgs = create_route_messages(&path, circuit_id, attempt, &spec);
            let mut sender = self
                .route_senders
                .register(circuit_id.clone(), self.options.route_timeout());

            match sender
                .route(
                    attempt,
                    &path,
                    &route_msgs,
                    self.strategy.as_ref(),
                    &chosen.record.id,
                )
                .await
            {
                Ok(peer_data) => {
                    let circuit = Arc::new(Circuit::new(
                        circuit_id.clone(),
                        client_id.to_string(),
                        service.id.clone(),
                        chosen.record.clone(),
                        path.clone(),
                        peer_data,
                        attempt + 1,
                    ));
                    self.circuits.add(circuit.clone());
                    self.events.publish(NetworkEvent::CircuitCreated {
                        circuit: circuit_id.clone(),
                        client: client_id.to_string(),
                        service: service.id.clone(),
                        path: path.to_string(),
                        timestamp: Utc::now(),
                    });
                    info!(circuit = %circuit_id, path = %path, "created circuit");
                    return Ok(circuit);
                }
                Err(failure) => {
                    warn!(circuit = %circuit_id, attempt, error = %failure.error,
                        "route attempt failed");
                    self.unroute_hops(&path, &failure.cleanups, circuit_id, true)
                        .await;
                    last_err = failure.error;
                }
            }
        }

        Err(last_err.into())
    }

    /// Annotate every reachable terminator of a service with its routing
    /// cost: the precedence-biased terminator cost plus the path cost from
    /// the ingress to the terminator's router.
    fn costed_terminators(
        &self,
        ingress: &Arc<Router>,
        service_id: &ServiceId,
    ) -> Result<Vec<CostedTerminator>, FabricError> {
        let records = self.stores.terminators_for_service(service_id);
        if records.is_empty() {
            return Err(EntityError::invalid("terminator", service_id.as_str()).into());
        }

        let mut candidates = Vec::new();
        for record in records {
            let Some(router) = self.routers.get_connected(&record.router) else {
                debug!(terminator = %record.id, router = %record.router,
                    "skipping terminator on disconnected router");
                continue;
            };
            let Ok((_, path_cost)) = self.path_engine.shortest_path(ingress, &router) else {
                continue;
            };
            let path_cost = u32::try_from(path_cost.max(0)).unwrap_or(u32::MAX);
            let route_cost = self
                .costs
                .route_cost(&record.id, record.cost)
                .saturating_add(path_cost);
            candidates.push(CostedTerminator {
                precedence: self.costs.precedence(&record.id),
                route_cost,
                record,
            });
        }

        if candidates.is_empty() {
            return Err(RouteError::NotRoutable(format!(
                "no reachable terminators for service {service_id}"
            ))
            .into());
        }
        Ok(candidates)
    }

    /// Remove a circuit: best-effort unroute to every hop of its path,
    /// then delete. Removing an unknown circuit id is an error.
    pub async fn remove_circuit(
        &self,
        circuit_id: &CircuitId,
        now: bool,
    ) -> Result<(), FabricError> {
        let Some(circuit) = self.circuits.remove(circuit_id) else {
            return Err(EntityError::InvalidCircuit(circuit_id.clone()).into());
        };
        let path = circuit.path();
        for router in &path.nodes {
            self.send_unroute(router, circuit_id, now).await;
        }
        self.events.publish(NetworkEvent::CircuitRemoved {
            circuit: circuit_id.clone(),
            timestamp: Utc::now(),
        });
        info!(circuit = %circuit_id, "removed circuit");
        Ok(())
    }

    /// Instruct the terminating hop to start egress for a circuit.
    pub async fn start_circuit_egress(&self, circuit_id: &CircuitId) -> Result<(), FabricError> {
        let circuit = self
            .circuits
            .get(circuit_id)
            .ok_or_else(|| EntityError::InvalidCircuit(circuit_id.clone()))?;
        let path = circuit.path();
        let terminating = path.terminating_router();
        let msg = Message::new(content::START_EGRESS, circuit_id.as_str().as_bytes().to_vec());
        let control = terminating
            .control()
            .ok_or_else(|| trellis_core::ChannelError::NotConnected(terminating.id.clone()))?;
        control.send(msg).await?;
        info!(circuit = %circuit_id, "started circuit egress");
        Ok(())
    }

    // -- rerouting ----------------------------------------------------------

    /// Reroute every circuit whose path uses `link`; circuits that fail to
    /// reroute are removed (self-healing by eviction).
    pub(crate) async fn reroute_link(&self, link: &Arc<Link>) {
        for circuit in self.circuits.all() {
            if !circuit.uses_link(&link.id) {
                continue;
            }
            info!(circuit = %circuit.id, link = %link.id, "circuit uses changed link");
            if let Err(err) = self.reroute_circuit(&circuit).await {
                error!(circuit = %circuit.id, error = %err,
                    "error rerouting circuit, removing");
                if let Err(err) = self.remove_circuit(&circuit.id, true).await {
                    error!(circuit = %circuit.id, error = %err, "error removing circuit");
                }
            }
        }
    }

    /// Recompute the circuit's path; dispatch new routes when it changed.
    pub async fn reroute_circuit(&self, circuit: &Arc<Circuit>) -> Result<(), FabricError> {
        if !circuit.begin_reroute() {
            debug!(circuit = %circuit.id, "reroute already in progress");
            return Ok(());
        }
        let result = self.reroute_circuit_guarded(circuit).await;
        circuit.end_reroute();
        result
    }

    async fn reroute_circuit_guarded(&self, circuit: &Arc<Circuit>) -> Result<(), FabricError> {
        warn!(circuit = %circuit.id, "rerouting circuit");
        let current = circuit.path();
        let updated = Arc::new(self.path_engine.update_path(&current)?);
        if updated.same_path(&current) {
            debug!(circuit = %circuit.id, "path unchanged, no reroute");
            return Ok(());
        }
        self.dispatch_path(circuit, updated).await
    }

    /// Send route messages for `new_path` and, on full attendance, replace
    /// the circuit's path. On failure the acknowledged hops of the new
    /// path are unrouted and the old path stays in place.
    pub(crate) async fn dispatch_path(
        &self,
        circuit: &Arc<Circuit>,
        new_path: Arc<Path>,
    ) -> Result<(), FabricError> {
        let attempt = circuit.next_attempt();
        let spec = EgressSpec {
            binding: circuit.terminator.effective_binding().to_string(),
            address: circuit.terminator.address.clone(),
            peer_data: circuit.terminator.peer_data.clone(),
        };
        let route_msgs = create_route_messages(&new_path, &circuit.id, attempt, &spec);
        let mut sender = self
            .route_senders
            .register(circuit.id.clone(), self.options.route_timeout());

        let result = sender
            .route(
                attempt,
                &new_path,
                &route_msgs,
                self.strategy.as_ref(),
                &circuit.terminator.id,
            )
            .await;
        self.route_senders.remove(&circuit.id);

        match result {
            Ok(_peer_data) => {
                circuit.set_path(new_path.clone());
                self.events.publish(NetworkEvent::CircuitUpdated {
                    circuit: circuit.id.clone(),
                    path: new_path.to_string(),
                    timestamp: Utc::now(),
                });
                info!(circuit = %circuit.id, path = %new_path, "rerouted circuit");
                Ok(())
            }
            Err(failure) => {
                self.unroute_hops(&new_path, &failure.cleanups, &circuit.id, true)
                    .await;
                Err(failure.error.into())
            }
        }
    }

    async fn unroute_hops(
        &self,
        path: &Path,
        hops: &HashSet<RouterId>,
        circuit_id: &CircuitId,
        now: bool,
    ) {
        for router in &path.nodes {
            if hops.contains(&router.id) {
                self.send_unroute(router, circuit_id, now).await;
            }
        }
    }

    async fn send_unroute(&self, router: &Arc<Router>, circuit_id: &CircuitId, now: bool) {
        let payload = UnroutePayload {
            circuit_id: circuit_id.clone(),
            now,
        };
        let msg = match Message::with_payload(content::UNROUTE, &payload) {
            Ok(msg) => msg,
            Err(err) => {
                error!(circuit = %circuit_id, error = %err, "failed to encode unroute");
                return;
            }
        };
        let Some(control) = router.control() else {
            error!(router = %router.id, circuit = %circuit_id,
                "no control channel for unroute");
            return;
        };
        if let Err(err) = control.send(msg).await {
            error!(router = %router.id, circuit = %circuit_id, error = %err,
                "error sending unroute");
        }
    }

    // -- topology maintenance -----------------------------------------------

    /// Propose and dial links that should exist given currently advertised
    /// listeners.
    pub(crate) async fn assemble(&self) {
        trace!("assembling topology");
        let routers = self.routers.all_connected();
        for link in self.links.missing_links(&routers) {
            info!(link = %link.id, src = %link.src.id, dst = %link.dst.id,
                "proposing link");
            self.links.add(link.clone());

            let payload = DialPayload {
                link_id: link.id.clone(),
                address: link.dst.advertised_listener.clone(),
                router_id: link.dst.id.clone(),
            };
            let msg = match Message::with_payload(content::DIAL, &payload) {
                Ok(msg) => msg,
                Err(err) => {
                    error!(link = %link.id, error = %err, "failed to encode dial");
                    continue;
                }
            };
            let Some(control) = link.src.control() else {
                error!(router = %link.src.id, "no control channel for dial");
                continue;
            };
            if let Err(err) = control.send(msg).await {
                error!(router = %link.src.id, link = %link.id, error = %err,
                    "error sending dial");
            }
        }
    }

    /// Drop links with a disconnected endpoint and expire Pending links
    /// that never came up.
    pub(crate) fn clean(&self) {
        trace!("cleaning topology");
        for link in self.links.all() {
            if !link.src.is_connected() || !link.dst.is_connected() {
                debug!(link = %link.id, "removing link with disconnected endpoint");
                self.links.remove(&link);
            }
        }

        let timeout = chrono::Duration::from_std(self.options.pending_link_timeout())
            .unwrap_or(chrono::Duration::MAX);
        let now = Utc::now();
        for link in self.links.links_in_mode(LinkMode::Pending) {
            if now - link.current_state().timestamp > timeout {
                info!(link = %link.id, "expiring pending link");
                link.add_state(LinkState::new(LinkMode::Failed));
                self.links.remove(&link);
            }
        }
    }

    // -- control loop -------------------------------------------------------

    /// Run the control loop until [`shutdown`](Network::shutdown).
    ///
    /// Serializes topology-change handling, periodic maintenance, and
    /// smart rerouting. May be called once per controller.
    pub async fn run(&self) {
        let receivers = self
            .loop_receivers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(mut receivers) = receivers else {
            error!("control loop already started");
            return;
        };

        info!("control loop started");
        let period = self.options.cycle_interval();
        let mut maintenance = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        maintenance.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                Some(router_id) = receivers.router_changed.recv() => {
                    info!(router = %router_id, "router changed");
                    self.assemble().await;
                    self.clean();
                }
                Some(link_id) = receivers.link_changed.recv() => {
                    info!(link = %link_id, "link changed");
                    if let Some(link) = self.links.get(&link_id) {
                        self.reroute_link(&link).await;
                    }
                }
                _ = maintenance.tick() => {
                    self.assemble().await;
                    self.clean();
                    self.smart().await;
                }
                _ = receivers.shutdown.changed() => break,
            }
        }
        info!("control loop exited");
    }

    /// Request shutdown; idempotent under concurrent callers.
    pub fn shutdown(&self) {
        if !self.is_shutdown.swap(true, Ordering::AcqRel) {
            let _ = self.shutdown_tx.send(true);
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.is_shutdown.load(Ordering::Acquire)
    }
}
