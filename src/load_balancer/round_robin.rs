// src/load_balancer/round_robin.rs
use crate::proxy::Backend;
use std::sync::Arc;

/// Scans at most one full rotation starting at the cursor, advancing the
/// cursor for every slot visited, healthy or not. A skipped backend becomes
/// eligible again as soon as it is marked healthy.
pub(crate) fn select(cursor: &mut usize, backends: &[Arc<Backend>]) -> Option<Arc<Backend>> {
    if backends.is_empty() {
        return None;
    }

    for _ in 0..backends.len() {
        let index = *cursor % backends.len();
        *cursor = cursor.wrapping_add(1);

        if backends[index].is_healthy() {
            return Some(Arc::clone(&backends[index]));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(address: &str, healthy: bool) -> Arc<Backend> {
        let backend = Arc::new(Backend::new(address).unwrap());
        backend.set_healthy(healthy);
        backend
    }

    #[test]
    fn rotates_through_healthy_backends() {
        let backends = vec![
            backend("http://127.0.0.1:9001", true),
            backend("http://127.0.0.1:9002", true),
        ];
        let mut cursor = 0;

        assert_eq!(
            select(&mut cursor, &backends).unwrap().address,
            backends[0].address
        );
        assert_eq!(
            select(&mut cursor, &backends).unwrap().address,
            backends[1].address
        );
        assert_eq!(
            select(&mut cursor, &backends).unwrap().address,
            backends[0].address
        );
    }

    #[test]
    fn cursor_advances_past_skipped_slots() {
        let backends = vec![
            backend("http://127.0.0.1:9001", false),
            backend("http://127.0.0.1:9002", true),
        ];
        let mut cursor = 0;

        assert_eq!(
            select(&mut cursor, &backends).unwrap().address,
            backends[1].address
        );
        // The unhealthy slot was visited too, so the cursor sits past it.
        assert_eq!(cursor, 2);

        backends[0].set_healthy(true);
        assert_eq!(
            select(&mut cursor, &backends).unwrap().address,
            backends[0].address
        );
    }

    #[test]
    fn full_scan_without_healthy_backend_returns_none() {
        let backends = vec![
            backend("http://127.0.0.1:9001", false),
            backend("http://127.0.0.1:9002", false),
        ];
        let mut cursor = 0;

        assert!(select(&mut cursor, &backends).is_none());
        assert_eq!(cursor, 2);
        assert!(select(&mut cursor, &[]).is_none());
    }
}
