//! Which service and characteristic a session settles on

use log::info;
use uuid::Uuid;

/// Picks the service and characteristic to use out of what discovery returned.
///
/// Both slices are in discovery order. Returning `None` fails the session.
pub trait SelectionStrategy: Send + Sync {
    fn select_service(&self, services: &[Uuid]) -> Option<Uuid>;
    fn select_characteristic(&self, service: Uuid, characteristics: &[Uuid]) -> Option<Uuid>;
}

/// Always takes the first entry
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstDiscovered;

impl SelectionStrategy for FirstDiscovered {
    fn select_service(&self, services: &[Uuid]) -> Option<Uuid> {
        services.first().copied()
    }

    fn select_characteristic(&self, _service: Uuid, characteristics: &[Uuid]) -> Option<Uuid> {
        characteristics.first().copied()
    }
}

/// Looks for known UUIDs and falls back to the first entry when they are absent
#[derive(Debug, Clone, Copy, Default)]
pub struct PreferredUuids {
    pub service: Option<Uuid>,
    pub characteristic: Option<Uuid>,
}

impl PreferredUuids {
    fn pick(preferred: Option<Uuid>, found: &[Uuid]) -> Option<Uuid> {
        match preferred {
            Some(uuid) if found.contains(&uuid) => Some(uuid),
            Some(uuid) => {
                info!("Preferred UUID {} not offered, using first discovered", uuid);
                found.first().copied()
            }
            None => found.first().copied(),
        }
    }
}

impl SelectionStrategy for PreferredUuids {
    fn select_service(&self, services: &[Uuid]) -> Option<Uuid> {
        Self::pick(self.service, services)
    }

    fn select_characteristic(&self, _service: Uuid, characteristics: &[Uuid]) -> Option<Uuid> {
        Self::pick(self.characteristic, characteristics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: Uuid = Uuid::from_u128(0xa);
    const B: Uuid = Uuid::from_u128(0xb);

    #[test]
    fn first_discovered_takes_index_zero() {
        assert_eq!(FirstDiscovered.select_service(&[A, B]), Some(A));
        assert_eq!(FirstDiscovered.select_characteristic(A, &[B, A]), Some(B));
        assert_eq!(FirstDiscovered.select_service(&[]), None);
    }

    #[test]
    fn preferred_falls_back_to_first() {
        let strategy = PreferredUuids {
            service: Some(B),
            characteristic: Some(Uuid::from_u128(0xc)),
        };
        assert_eq!(strategy.select_service(&[A, B]), Some(B));
        assert_eq!(strategy.select_characteristic(B, &[A, B]), Some(A));
        assert_eq!(strategy.select_characteristic(B, &[]), None);
    }
}
