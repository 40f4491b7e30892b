// src/load_balancer/least_connections.rs
use crate::proxy::Backend;
use std::sync::Arc;

/// One pass over the whole membership, strictly smallest load among healthy
/// backends wins. Ties go to the first backend in membership order.
pub(crate) fn select(backends: &[Arc<Backend>]) -> Option<Arc<Backend>> {
    let mut selected: Option<(usize, &Arc<Backend>)> = None;

    for backend in backends {
        let Some(load) = backend.load_if_healthy() else {
            continue;
        };
        match selected {
            Some((min, _)) if load >= min => {}
            _ => selected = Some((load, backend)),
        }
    }

    selected.map(|(_, backend)| Arc::clone(backend))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(address: &str, healthy: bool, load: usize) -> Arc<Backend> {
        let backend = Arc::new(Backend::new(address).unwrap());
        backend.set_healthy(healthy);
        for _ in 0..load {
            backend.increment_load();
        }
        backend
    }

    #[test]
    fn picks_smallest_load() {
        let backends = vec![
            backend("http://127.0.0.1:9001", true, 5),
            backend("http://127.0.0.1:9002", true, 2),
            backend("http://127.0.0.1:9003", true, 8),
        ];

        assert_eq!(select(&backends).unwrap().address, backends[1].address);
    }

    #[test]
    fn ties_break_in_membership_order() {
        let backends = vec![
            backend("http://127.0.0.1:9001", true, 3),
            backend("http://127.0.0.1:9002", true, 3),
        ];

        assert_eq!(select(&backends).unwrap().address, backends[0].address);
    }

    #[test]
    fn unhealthy_backends_never_win_even_at_zero_load() {
        let backends = vec![
            backend("http://127.0.0.1:9001", false, 0),
            backend("http://127.0.0.1:9002", true, 7),
        ];

        assert_eq!(select(&backends).unwrap().address, backends[1].address);
    }

    #[test]
    fn no_healthy_backend_returns_none() {
        let backends = vec![backend("http://127.0.0.1:9001", false, 0)];
        assert!(select(&backends).is_none());
        assert!(select(&[]).is_none());
    }
}
