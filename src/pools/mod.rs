//! Resource pools
//!
//! Each pool owns one kind of cloud resource and exposes Add/Get/Sync/GC/
//! Delete/Shutdown over it. Pools are driven sequentially by the controller;
//! their caches are guarded so status readers may look at them concurrently.

pub mod backends;
pub mod healthchecks;
pub mod instances;
pub mod l7;
pub mod loadbalancers;


pub use backends::BackendPool;
pub use healthchecks::HealthChecker;
pub use instances::InstancePool;
pub use l7::{L7Record, L7Request, L7Stage, RouteTable, L7};
pub use loadbalancers::LoadBalancerPool;

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use super::*;
    use crate::cloud::{CloudInterfaces, FakeCloud};
    use crate::naming::Namer;

    pub const DEFAULT_BACKEND_PORT: i64 = 30300;

    pub struct FakePools {
        pub cloud: Arc<FakeCloud>,
        pub nodes: Arc<InstancePool>,
        pub backends: Arc<BackendPool>,
        pub load_balancers: LoadBalancerPool,
    }

    pub fn fake_pools(delete_all_on_quit: bool) -> FakePools {
        let cloud = Arc::new(FakeCloud::new());
        let ifaces = CloudInterfaces::fake(&cloud);
        let namer = Namer::default();
        let nodes = Arc::new(InstancePool::new(ifaces.instance_groups, namer.clone()));
        let checker = Arc::new(HealthChecker::new(
            ifaces.health_checks,
            namer.clone(),
            "/",
        ));
        let backends = Arc::new(BackendPool::new(
            ifaces.backend_services,
            checker,
            nodes.clone(),
            namer.clone(),
        ));
        let load_balancers = LoadBalancerPool::new(
            ifaces.load_balancers,
            backends.clone(),
            namer,
            DEFAULT_BACKEND_PORT,
            delete_all_on_quit,
        );
        FakePools {
            cloud,
            nodes,
            backends,
            load_balancers,
        }
    }
}
