use tracing::{debug, error, info, warn};

use crate::{
    climate::{format_temp, validate_thresholds, ClimateSettings, RestoredAcState},
    command::{ClientCommand, CommandError, Reply},
    config::GatewayConfig,
    mesh::{InboundFrame, MeshAdapter, MeshTransport},
    nodes::{HealthTransition, NodeRegistry, NodeSnapshot},
    packet::{decode, encode, Packet, PacketKey, PacketValue},
    safety::{SafetyAction, SafetySupervisor},
    store::{AcStateEvent, NodeStatusRecord, PersistenceGateway, SettingKey, StoredSettings},
    types::{on_off, title_case_bool, FreshnessState, Moment, NodeId},
};

pub struct Dispatcher<T, S> {
    config: GatewayConfig,
    registry: NodeRegistry,
    climate: ClimateSettings,
    supervisor: SafetySupervisor,
    mesh: MeshAdapter<T>,
    store: S,
    last_sweep_ms: u64,
}

impl<T: MeshTransport, S: PersistenceGateway> Dispatcher<T, S> {
    pub fn bootstrap(config: GatewayConfig, transport: T, mut store: S, now: Moment) -> Self {
        let stored = store.load_settings().unwrap_or_else(|err| {
            error!("failed to load settings, using defaults: {err}");
            StoredSettings::new()
        });
        let last_event = store.last_state_event().unwrap_or_else(|err| {
            error!("failed to read last AC state: {err}");
            None
        });

        let stale_minutes = config.timing.state_stale_minutes;
        let (climate, restored) =
            ClimateSettings::from_stored(&stored, config.defaults, last_event, |event| {
                store.is_stale(event.timestamp(), now.wall, stale_minutes)
            });

        match restored {
            RestoredAcState::Restored(state) => info!("restored AC state {}", on_off(state)),
            RestoredAcState::Defaulted => info!("no recent AC state on record, assuming OFF"),
            RestoredAcState::ExpiredOn => {
                warn!(
                    "last AC record is older than {} minutes, recording OFF",
                    config.timing.state_stale_minutes
                );
                if let Err(err) = store.append_state_event(&AcStateEvent::at(now.wall, false)) {
                    error!("failed to record AC state: {err}");
                }
            }
        }
        info!(
            "thresholds max={} min={} allowed={}",
            format_temp(climate.max_temp),
            format_temp(climate.min_temp),
            title_case_bool(climate.ac_allowed)
        );

        let timing = &config.timing;
        let registry = NodeRegistry::new(&config.mesh.nodes, timing.health_interval_secs * 1_000);
        let supervisor = SafetySupervisor::new(
            timing.temp_warning_secs * 1_000,
            timing.temp_safety_secs * 1_000,
            now.monotonic_ms,
        );
        let mesh = MeshAdapter::new(transport, config.retry);

        Self {
            config,
            registry,
            climate,
            supervisor,
            mesh,
            store,
            last_sweep_ms: now.monotonic_ms,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn climate(&self) -> &ClimateSettings {
        &self.climate
    }

    pub fn freshness(&self) -> FreshnessState {
        self.supervisor.state()
    }

    pub fn nodes(&self) -> Vec<NodeSnapshot> {
        self.registry.snapshot()
    }

    pub fn transport(&self) -> &T {
        self.mesh.transport()
    }

    pub fn transport_mut(&mut self) -> &mut T {
        self.mesh.transport_mut()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn poll_receive(&mut self) -> Option<InboundFrame> {
        self.mesh.poll_receive()
    }

    pub fn drain_inbound(&mut self, now: Moment) -> usize {
        let mut count = 0;
        while let Some(frame) = self.poll_receive() {
            self.handle_frame(&frame, now);
            count += 1;
        }
        count
    }

    pub fn handle_frame(&mut self, frame: &InboundFrame, now: Moment) {
        let packet = match decode(&frame.payload) {
            Ok(packet) => packet,
            Err(err) => {
                warn!(node = %frame.node, "dropping frame {:?}: {err}", frame.payload);
                return;
            }
        };
        info!(node = %frame.node, "RX {} ({})", frame.payload, packet.describe());

        if let Some(transition) = self.registry.observe(frame.node, &frame.payload, now) {
            self.persist_transition(&transition);
        }
        self.handle_inbound_packet(frame.node, &packet, now);
    }

    pub fn handle_inbound_packet(&mut self, node: NodeId, packet: &Packet, now: Moment) {
        let sync = packet.contains(PacketKey::Sync);
        if sync {
            info!(node = %node, "sync request, sending settings");
            self.send_settings(node);
        }

        if let Some(temperature) = packet.float(PacketKey::Temperature) {
            self.climate.record_temperature(temperature);
            self.supervisor.record_reading(now.monotonic_ms);
            if !sync {
                let state = self.ac_flag();
                self.send_pairs(node, &[(PacketKey::AcState, state)]);
            }
        }
        if let Some(humidity) = packet.float(PacketKey::Humidity) {
            self.climate.record_humidity(humidity);
        }

        if packet.contains(PacketKey::MaxTemp) || packet.contains(PacketKey::MinTemp) {
            self.apply_node_thresholds(node, packet);
        }

        if let Some(state) = packet.flag(PacketKey::AcState) {
            debug!(node = %node, "AC status report {}", on_off(state));
            self.apply_ac_state(state, now);
        }

        if packet.contains(PacketKey::TogglePermission) {
            self.toggle_permission(now);
        }

        if packet.contains(PacketKey::Query) {
            info!(node = %node, "state query, sending AC state");
            let state = self.ac_flag();
            self.send_pairs(node, &[(PacketKey::AcState, state)]);
        }

        for key in [PacketKey::AcAllowed, PacketKey::Brightness, PacketKey::Reset] {
            if packet.contains(key) {
                debug!(node = %node, "ignoring '{}' from a node", key.as_char());
            }
        }
    }

    pub fn handle_client_command(
        &mut self,
        command: ClientCommand,
        now: Moment,
    ) -> Result<Reply, CommandError> {
        debug!("client command {command:?}");
        match command {
            ClientCommand::Status => Ok(Reply::Text(self.status_line())),
            ClientCommand::CurrentTemp => Ok(Reply::Text(
                self.climate
                    .latest_temperature()
                    .map(format_temp)
                    .unwrap_or_else(|| "---".to_string()),
            )),
            ClientCommand::AcStatus => Ok(Reply::text(ac_status_text(self.climate.ac_state()))),
            ClientCommand::AcPermStatus => {
                Ok(Reply::text(title_case_bool(self.climate.ac_allowed)))
            }
            ClientCommand::TurnOnAc => {
                if !self.climate.ac_allowed {
                    warn!("TurnOnAC rejected, AC not allowed");
                    return Err(CommandError::NotPermitted);
                }
                self.switch_ac(true, now)?;
                Ok(Reply::text(ac_status_text(true)))
            }
            ClientCommand::TurnOffAc => {
                self.switch_ac(false, now)?;
                Ok(Reply::text(ac_status_text(false)))
            }
            ClientCommand::TogglePermission => {
                self.toggle_permission(now);
                Ok(Reply::Silent)
            }
            ClientCommand::GetThresholds => Ok(Reply::Text(format!(
                "Temps:{},{}",
                format_temp(self.climate.max_temp),
                format_temp(self.climate.min_temp)
            ))),
            ClientCommand::SetThresholds { max, min } => {
                if !validate_thresholds(max, min) {
                    warn!("rejected thresholds max={max} min={min}");
                    return Err(CommandError::InvalidThresholds { max, min });
                }
                self.climate.set_thresholds(max, min);
                self.persist_thresholds();
                let display = self.config.mesh.display_node;
                self.send_settings(display);
                Ok(Reply::Silent)
            }
            ClientCommand::SetBrightness(level) => {
                let level = level.min(100);
                let display = self.config.mesh.display_node;
                if self.send_pairs(display, &[(PacketKey::Brightness, PacketValue::Int(level.into()))]) {
                    info!("display brightness set to {level}%");
                }
                Ok(Reply::Silent)
            }
            ClientCommand::ResetNode => {
                let relay = self.config.mesh.relay_node;
                let delivered = self.send_pairs(relay, &[(PacketKey::Reset, PacketValue::Int(1))]);
                Ok(Reply::text(if delivered {
                    "ResetNode Success"
                } else {
                    "ResetNode Failed"
                }))
            }
            ClientCommand::Shutdown => {
                info!("client requested disconnect");
                Ok(Reply::Disconnect)
            }
        }
    }

    pub fn tick(&mut self, now: Moment) {
        let sweep_ms = self.config.timing.sweep_interval_secs * 1_000;
        if now.monotonic_ms.saturating_sub(self.last_sweep_ms) >= sweep_ms {
            self.last_sweep_ms = now.monotonic_ms;
            self.sweep_nodes(now);
        }
        self.supervise(now);
    }

    pub fn sweep_nodes(&mut self, now: Moment) {
        for transition in self.registry.sweep(now) {
            warn!(node = %transition.node.id, "{} went offline", transition.node.name);
            self.persist_transition(&transition);
        }
    }

    pub fn supervise(&mut self, now: Moment) {
        match self.supervisor.evaluate(now.monotonic_ms) {
            Some(SafetyAction::ForceShutoff { .. }) => {
                self.force_ac_off("temperature data is stale", now);
            }
            Some(SafetyAction::Warn { .. }) | None => {}
        }
    }

    /// Switches the AC off no matter what the permission flag says. A relay
    /// that does not answer does not keep the state on.
    pub fn force_ac_off(&mut self, reason: &str, now: Moment) {
        if !self.climate.ac_state() {
            debug!("AC already off ({reason})");
            return;
        }
        warn!("forcing AC off: {reason}");

        let relay = self.config.mesh.relay_node;
        if !self.send_pairs(relay, &[(PacketKey::AcState, PacketValue::Flag(false))]) {
            error!("relay did not confirm forced shutoff");
        }
        let display = self.config.mesh.display_node;
        self.send_pairs(display, &[(PacketKey::AcState, PacketValue::Flag(false))]);
        self.apply_ac_state(false, now);
    }

    pub fn status_line(&self) -> String {
        let temp = self
            .climate
            .latest_temperature()
            .map(format_temp)
            .unwrap_or_else(|| "---".to_string());
        let nodes = self
            .registry
            .snapshot()
            .iter()
            .map(|node| format!("{}={}", node.name, node.health.as_str()))
            .collect::<Vec<_>>();
        let nodes = if nodes.is_empty() {
            "---".to_string()
        } else {
            nodes.join(";")
        };

        format!(
            "status:temp={temp},ac={},max={},min={},allow={},nodes={nodes}",
            on_off(self.climate.ac_state()),
            format_temp(self.climate.max_temp),
            format_temp(self.climate.min_temp),
            title_case_bool(self.climate.ac_allowed),
        )
    }

    fn switch_ac(&mut self, state: bool, now: Moment) -> Result<(), CommandError> {
        let relay = self.config.mesh.relay_node;
        if !self.send_pairs(relay, &[(PacketKey::AcState, PacketValue::Flag(state))]) {
            return Err(CommandError::RelayUnavailable);
        }
        let display = self.config.mesh.display_node;
        self.send_pairs(display, &[(PacketKey::AcState, PacketValue::Flag(state))]);
        self.apply_ac_state(state, now);
        Ok(())
    }

    fn apply_ac_state(&mut self, state: bool, now: Moment) -> bool {
        if !self.climate.set_ac_state(state) {
            return false;
        }
        info!("AC state -> {}", on_off(state));
        if let Err(err) = self.store.append_state_event(&AcStateEvent::at(now.wall, state)) {
            error!("failed to record AC state: {err}");
        }
        true
    }

    fn toggle_permission(&mut self, now: Moment) {
        let allowed = self.climate.toggle_allowed();
        info!("AC permission {}", if allowed { "enabled" } else { "disabled" });
        if let Err(err) = self
            .store
            .save_setting(SettingKey::AcAllowed, title_case_bool(allowed))
        {
            error!("failed to save AC permission: {err}");
        }

        let display = self.config.mesh.display_node;
        self.send_pairs(display, &[(PacketKey::AcAllowed, PacketValue::Flag(allowed))]);

        if !allowed {
            self.force_ac_off("AC permission revoked", now);
        }
    }

    fn apply_node_thresholds(&mut self, node: NodeId, packet: &Packet) {
        let max = packet
            .float(PacketKey::MaxTemp)
            .unwrap_or(self.climate.max_temp);
        let min = packet
            .float(PacketKey::MinTemp)
            .unwrap_or(self.climate.min_temp);

        if !validate_thresholds(max, min) {
            warn!(node = %node, "ignoring thresholds max={max} min={min}");
            return;
        }
        if self.climate.set_thresholds(max, min) {
            self.persist_thresholds();
        }
    }

    fn persist_thresholds(&mut self) {
        let max = format_temp(self.climate.max_temp);
        let min = format_temp(self.climate.min_temp);
        for (key, value) in [(SettingKey::MaxTemp, &max), (SettingKey::MinTemp, &min)] {
            if let Err(err) = self.store.save_setting(key, value) {
                error!("failed to save {}: {err}", key.as_str());
            }
        }
        info!("thresholds saved: max={max} min={min}");
    }

    fn persist_transition(&mut self, transition: &HealthTransition) {
        info!(
            node = %transition.node.id,
            "{}: {} -> {}",
            transition.node.name,
            transition.from.as_str(),
            transition.node.health.as_str()
        );
        let record = NodeStatusRecord::from(&transition.node);
        if let Err(err) = self.store.upsert_node_status(&record) {
            error!(node = %transition.node.id, "failed to save node status: {err}");
        }
    }

    fn send_settings(&mut self, node: NodeId) -> bool {
        let pairs = [
            (PacketKey::MaxTemp, PacketValue::Float(self.climate.max_temp)),
            (PacketKey::MinTemp, PacketValue::Float(self.climate.min_temp)),
            (PacketKey::AcAllowed, PacketValue::Flag(self.climate.ac_allowed)),
            (PacketKey::AcState, self.ac_flag()),
        ];
        self.send_pairs(node, &pairs)
    }

    fn send_pairs(&mut self, node: NodeId, pairs: &[(PacketKey, PacketValue)]) -> bool {
        match encode(pairs) {
            Ok(payload) => self.mesh.try_send(node, &payload),
            Err(err) => {
                error!(node = %node, "cannot encode packet: {err}");
                false
            }
        }
    }

    fn ac_flag(&self) -> PacketValue {
        PacketValue::Flag(self.climate.ac_state())
    }
}

fn ac_status_text(state: bool) -> String {
    format!("AC is {}", on_off(state))
}
