//! Health-aware backend selection.

use std::sync::Arc;

use tracing::debug;

use crate::backend::ServiceId;
use crate::config::RoutingConfig;
use crate::health::HealthMonitor;
use crate::request::RequestCategory;

/// Picks a backend for each request category.
///
/// Selection is a pure function of the static routing table and current
/// health: the preferred backend if healthy, else the alternate if healthy,
/// else the preferred backend anyway.
#[derive(Debug, Clone)]
pub struct ServiceRouter {
    routing: RoutingConfig,
    health: Arc<HealthMonitor>,
}

impl ServiceRouter {
    /// Creates a router over the given routing table.
    #[must_use]
    pub const fn new(routing: RoutingConfig, health: Arc<HealthMonitor>) -> Self {
        Self { routing, health }
    }

    /// Returns the configured preferred backend for a category.
    #[must_use]
    pub const fn preferred_for(&self, category: RequestCategory) -> ServiceId {
        self.routing.preferred(category)
    }

    /// Returns the backend a request of this category should try first.
    #[must_use]
    pub fn recommended_service(&self, category: RequestCategory) -> ServiceId {
        let preferred = self.preferred_for(category);
        if self.health.is_service_healthy(preferred) {
            return preferred;
        }

        let alternate = preferred.alternate();
        if self.health.is_service_healthy(alternate) {
            debug!(%category, %preferred, %alternate, "Preferred service unhealthy, routing to alternate");
            return alternate;
        }

        debug!(%category, %preferred, "No healthy service, routing to preferred");
        preferred
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::EventBroadcaster;

    fn router(threshold: u32) -> (ServiceRouter, Arc<HealthMonitor>) {
        let health = Arc::new(HealthMonitor::new(threshold, EventBroadcaster::new(8)));
        (
            ServiceRouter::new(RoutingConfig::default(), Arc::clone(&health)),
            health,
        )
    }

    fn fail(health: &HealthMonitor, id: ServiceId, times: u32) {
        for _ in 0..times {
            health.record_outcome(id, false, None);
        }
    }

    #[test]
    fn test_healthy_preferred_is_returned() {
        let (router, _) = router(3);
        assert_eq!(router.recommended_service(RequestCategory::Code), ServiceId::Local);
        assert_eq!(
            router.recommended_service(RequestCategory::Explanation),
            ServiceId::Cloud
        );
        assert_eq!(
            router.recommended_service(RequestCategory::Analysis),
            ServiceId::Cloud
        );
    }

    #[test]
    fn test_unhealthy_local_routes_code_to_cloud() {
        let (router, health) = router(3);
        fail(&health, ServiceId::Local, 3);

        assert!(!health.is_service_healthy(ServiceId::Local));
        assert_eq!(router.recommended_service(RequestCategory::Code), ServiceId::Cloud);
        assert_eq!(router.preferred_for(RequestCategory::Code), ServiceId::Local);
    }

    #[test]
    fn test_both_unhealthy_returns_preferred() {
        let (router, health) = router(1);
        fail(&health, ServiceId::Local, 1);
        fail(&health, ServiceId::Cloud, 1);

        for _ in 0..3 {
            assert_eq!(router.recommended_service(RequestCategory::Code), ServiceId::Local);
            assert_eq!(
                router.recommended_service(RequestCategory::Analysis),
                ServiceId::Cloud
            );
        }
    }

    #[test]
    fn test_recovery_restores_preferred() {
        let (router, health) = router(2);
        fail(&health, ServiceId::Cloud, 2);
        assert_eq!(
            router.recommended_service(RequestCategory::Explanation),
            ServiceId::Local
        );

        health.record_outcome(ServiceId::Cloud, true, Some(30));
        assert_eq!(
            router.recommended_service(RequestCategory::Explanation),
            ServiceId::Cloud
        );
    }
}
