// In-flight outpoint reservations shared by concurrent spends

use crate::core::OutPoint;
use crate::error::{Result, WalletError};
use crate::storage::UtxoSet;
use log::debug;
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

/// Outpoints held by spends that have been built but not yet recorded
#[derive(Debug, Default)]
pub struct ReservationTable {
    reserved: Mutex<HashSet<OutPoint>>,
}

impl ReservationTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<OutPoint>> {
        self.reserved.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Reserve all of `outpoints` or none of them
    pub fn reserve(&self, outpoints: &[OutPoint]) -> Result<Reservation<'_>> {
        let mut reserved = self.lock();
        if let Some(taken) = outpoints.iter().find(|op| reserved.contains(*op)) {
            return Err(WalletError::OutpointReserved(taken.to_string()));
        }
        let mut held = Vec::with_capacity(outpoints.len());
        for outpoint in outpoints {
            if reserved.insert(*outpoint) {
                held.push(*outpoint);
            }
        }
        debug!("Reserved {} outpoints", held.len());
        Ok(Reservation { table: self, outpoints: held })
    }

    pub fn is_reserved(&self, outpoint: &OutPoint) -> bool {
        self.lock().contains(outpoint)
    }

    /// Snapshot without any reserved outpoint
    pub fn filter(&self, utxos: &UtxoSet) -> UtxoSet {
        let reserved = self.lock();
        utxos.without(&reserved)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn release(&self, outpoints: &[OutPoint]) {
        let mut reserved = self.lock();
        for outpoint in outpoints {
            reserved.remove(outpoint);
        }
    }
}

/// Held outpoints; released when dropped
#[derive(Debug)]
pub struct Reservation<'a> {
    table: &'a ReservationTable,
    outpoints: Vec<OutPoint>,
}

impl Reservation<'_> {
    pub fn outpoints(&self) -> &[OutPoint] {
        &self.outpoints
    }

    /// Hold the outpoints for the life of the table instead of releasing them
    pub fn keep(mut self) -> Vec<OutPoint> {
        std::mem::take(&mut self.outpoints)
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.table.release(&self.outpoints);
        debug!("Released {} outpoints", self.outpoints.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Hash256;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    fn outpoint(seed: u8) -> OutPoint {
        OutPoint::new(Hash256::new([seed; 32]), 0)
    }

    #[test]
    fn test_reserve_and_release() {
        let table = ReservationTable::new();
        {
            let reservation = table.reserve(&[outpoint(1), outpoint(2)]).unwrap();
            assert_eq!(reservation.outpoints().len(), 2);
            assert!(table.is_reserved(&outpoint(1)));
        }
        assert!(table.is_empty());
    }

    #[test]
    fn test_kept_reservation_survives_drop() {
        let table = ReservationTable::new();
        let kept = table.reserve(&[outpoint(1), outpoint(2)]).unwrap().keep();
        assert_eq!(kept, vec![outpoint(1), outpoint(2)]);
        assert_eq!(table.len(), 2);
        assert!(table.reserve(&[outpoint(2)]).is_err());
    }

    #[test]
    fn test_conflicting_reservation_is_all_or_nothing() {
        let table = ReservationTable::new();
        let _held = table.reserve(&[outpoint(1)]).unwrap();

        let err = table.reserve(&[outpoint(2), outpoint(1)]).unwrap_err();
        assert!(matches!(err, WalletError::OutpointReserved(_)));
        // Nothing from the failed attempt stays reserved
        assert!(!table.is_reserved(&outpoint(2)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_filter_hides_reserved() {
        use crate::core::TxOutput;
        use crate::storage::Utxo;

        let table = ReservationTable::new();
        let utxos = UtxoSet::from_utxos([
            Utxo::new(outpoint(1), TxOutput::new(1_000, vec![0x51]), 1),
            Utxo::new(outpoint(2), TxOutput::new(2_000, vec![0x51]), 1),
        ]);
        let _held = table.reserve(&[outpoint(1)]).unwrap();
        assert_eq!(table.filter(&utxos).total_value(), 2_000);
    }

    #[test]
    fn test_concurrent_reservations_never_overlap() {
        let table = Arc::new(ReservationTable::new());
        let holders = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let table = Arc::clone(&table);
                let holders = Arc::clone(&holders);
                thread::spawn(move || match table.reserve(&[outpoint(7)]) {
                    Ok(reservation) => {
                        assert_eq!(holders.fetch_add(1, Ordering::SeqCst), 0);
                        thread::sleep(std::time::Duration::from_millis(20));
                        holders.fetch_sub(1, Ordering::SeqCst);
                        drop(reservation);
                        1
                    }
                    Err(_) => 0,
                })
            })
            .collect();

        let winners: i32 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert!(winners >= 1);
        assert!(table.is_empty());
    }
}
