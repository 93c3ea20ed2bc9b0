//! Registration lifecycle.
//!
//! ```text
//!  Idle ─► Registering ─► Running ─► Deregistering ─► Terminated
//!              │                                          ▲
//!              └──────── service registration failed ─────┘
//! ```
//!
//! Registration order is consumers, upstream, service, routes, descriptor.
//! Only a failed service registration aborts; everything else is logged and
//! skipped. Teardown runs in reverse dependency order: routes, stale routes
//! still referencing the descriptor, descriptor, service, upstream (when one
//! was built). Every teardown step is attempted regardless of earlier
//! failures; deleting an object the gateway does not hold succeeds.

use crate::client::{AdminClient, AdminTransport, ConsumerOutcome, ReqwestTransport};
use crate::error::{AgentResult, GatewayResult};
use crate::settings::AgentSettings;
use std::fmt;
use std::future::Future;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Registering,
    Running,
    Deregistering,
    Terminated,
}

/// What a registration left in the gateway, for teardown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registration {
    /// Consumers accepted by the gateway.
    pub consumers: Vec<String>,
    /// Set when an upstream object was built, whether or not the PUT worked.
    pub upstream_id: Option<String>,
    pub service_id: String,
    /// Ids of every assembled route, submitted or not.
    pub route_ids: Vec<String>,
    pub failed_routes: Vec<String>,
    pub proto_id: String,
    pub descriptor_registered: bool,
}

/// One teardown action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeardownStep {
    Route(String),
    ListRoutes,
    /// Route found by listing that still references the descriptor.
    StaleRoute(String),
    Descriptor(String),
    Service(String),
    Upstream(String),
}

impl fmt::Display for TeardownStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Route(id) => write!(f, "route {id}"),
            Self::ListRoutes => f.write_str("route listing"),
            Self::StaleRoute(id) => write!(f, "stale route {id}"),
            Self::Descriptor(id) => write!(f, "descriptor {id}"),
            Self::Service(id) => write!(f, "service {id}"),
            Self::Upstream(id) => write!(f, "upstream {id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub step: TeardownStep,
    pub error: Option<String>,
}

/// Per-step outcomes of a teardown, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub steps: Vec<StepOutcome>,
}

impl TeardownReport {
    fn record<T>(&mut self, step: TeardownStep, result: &GatewayResult<T>) {
        match result {
            Ok(_) => info!(%step, "deregistered"),
            Err(e) => error!(%step, error = %e, "failed to deregister"),
        }
        self.steps.push(StepOutcome {
            step,
            error: result.as_ref().err().map(ToString::to_string),
        });
    }

    pub fn failures(&self) -> impl Iterator<Item = &StepOutcome> {
        self.steps.iter().filter(|s| s.error.is_some())
    }

    pub fn is_clean(&self) -> bool {
        self.failures().next().is_none()
    }
}

/// Drives registration, waits for shutdown, then tears everything down.
pub struct Orchestrator<T = ReqwestTransport> {
    client: AdminClient<T>,
    settings: AgentSettings,
    state: watch::Sender<LifecycleState>,
}

impl<T: AdminTransport> Orchestrator<T> {
    pub fn new(client: AdminClient<T>, settings: AgentSettings) -> Self {
        let (state, _) = watch::channel(LifecycleState::Idle);
        Self {
            client,
            settings,
            state,
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    fn set_state(&self, state: LifecycleState) {
        info!(?state, "lifecycle transition");
        self.state.send_replace(state);
    }

    /// Register, wait for `shutdown`, then deregister.
    pub async fn run<F>(&self, shutdown: F) -> AgentResult<TeardownReport>
    where
        F: Future<Output = ()>,
    {
        let registration = self.register().await?;
        info!(
            service_id = %registration.service_id,
            routes = registration.route_ids.len(),
            "agent running, waiting for shutdown"
        );
        shutdown.await;
        info!("shutdown requested");
        Ok(self.deregister(&registration).await)
    }

    pub async fn register(&self) -> AgentResult<Registration> {
        self.set_state(LifecycleState::Registering);
        let settings = &self.settings;
        let mut registration = Registration {
            service_id: settings.identity.service_id.clone(),
            proto_id: settings.proto_id().to_string(),
            ..Registration::default()
        };

        for consumer in &settings.consumers {
            match self.client.register_consumer(consumer).await {
                Ok(ConsumerOutcome::Registered) => {
                    info!(consumer = %consumer.name, "consumer registered");
                    registration.consumers.push(consumer.name.clone());
                }
                Ok(ConsumerOutcome::Skipped) => {
                    info!(consumer = %consumer.name, "consumer has no auth plugin, skipped");
                }
                Err(e) => error!(consumer = %consumer.name, error = %e, "failed to register consumer"),
            }
        }

        match settings.upstream_object() {
            Ok(upstream) => {
                registration.upstream_id = Some(upstream.id.clone());
                match self.client.register_upstream(&upstream).await {
                    Ok(()) => info!(upstream_id = %upstream.id, "upstream registered"),
                    Err(e) => error!(upstream_id = %upstream.id, error = %e, "failed to register upstream"),
                }
            }
            Err(e) => error!(error = %e, "skipping upstream"),
        }

        let service = settings.service_object();
        if let Err(e) = self.client.register_service(&service).await {
            error!(service_id = %service.id, error = %e, "failed to register service");
            self.set_state(LifecycleState::Terminated);
            return Err(e.into());
        }
        info!(service_id = %service.id, "service registered");

        let descriptors = match settings.extract_descriptors() {
            Ok(descriptors) => descriptors,
            Err(e) => {
                error!(error = %e, "failed to extract routes from proto file");
                Vec::new()
            }
        };
        if descriptors.is_empty() {
            info!("no annotated routes to register");
        }
        for assembled in settings.assemble_routes(&descriptors) {
            let route = assembled.route;
            registration.route_ids.push(route.id.clone());
            let result = self.client.register_route(&route).await;
            match result {
                Ok(()) => info!(route_id = %route.id, uri = %route.uri, "route registered"),
                Err(e) => {
                    error!(route_id = %route.id, uri = %route.uri, error = %e, "failed to register route");
                    registration.failed_routes.push(route.id);
                }
            }
        }

        match settings.load_descriptor() {
            None => info!("no proto descriptor configured, skipping"),
            Some(Err(e)) => error!(error = %e, "failed to read proto descriptor"),
            Some(Ok(proto)) => {
                let result = self.client.register_proto(&registration.proto_id, &proto).await;
                match result {
                    Ok(()) => {
                        info!(proto_id = %registration.proto_id, "proto descriptor registered");
                        registration.descriptor_registered = true;
                    }
                    Err(e) => error!(proto_id = %registration.proto_id, error = %e, "failed to register proto descriptor"),
                }
            }
        }

        if !registration.failed_routes.is_empty() {
            warn!(failed = ?registration.failed_routes, "some routes were not registered");
        }
        self.set_state(LifecycleState::Running);
        Ok(registration)
    }

    pub async fn deregister(&self, registration: &Registration) -> TeardownReport {
        self.set_state(LifecycleState::Deregistering);
        let mut report = TeardownReport::default();

        for id in &registration.route_ids {
            let result = self.client.delete_route(id).await;
            report.record(TeardownStep::Route(id.clone()), &result);
        }

        let listing = self.client.list_routes().await;
        report.record(TeardownStep::ListRoutes, &listing);
        if let Ok(listing) = listing {
            for id in listing.routes_referencing_proto(&registration.proto_id) {
                warn!(route_id = %id, proto_id = %registration.proto_id, "removing route still referencing descriptor");
                let result = self.client.delete_route(&id).await;
                report.record(TeardownStep::StaleRoute(id), &result);
            }
        }

        let result = self.client.delete_proto(&registration.proto_id).await;
        report.record(TeardownStep::Descriptor(registration.proto_id.clone()), &result);

        let result = self.client.delete_service(&registration.service_id).await;
        report.record(TeardownStep::Service(registration.service_id.clone()), &result);

        if let Some(upstream_id) = &registration.upstream_id {
            let result = self.client.delete_upstream(upstream_id).await;
            report.record(TeardownStep::Upstream(upstream_id.clone()), &result);
        }

        self.set_state(LifecycleState::Terminated);
        report
    }
}
