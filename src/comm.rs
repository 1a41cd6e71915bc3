/// Collective operations across the processes sharing a distributed discretization.
///
/// Every rank must call each collective in the same order.
pub trait Communicator: Sync {
    fn size(&self) -> usize;

    fn rank(&self) -> usize;

    /// Replaces each entry by its sum over all ranks.
    fn sum_all(&self, values: &mut [f64]);

    fn sum(&self, value: f64) -> f64 {
        let mut values = [value];
        self.sum_all(&mut values);
        values[0]
    }
}

/// A communicator for a single process.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialComm;

impl Communicator for SerialComm {
    fn size(&self) -> usize {
        1
    }

    fn rank(&self) -> usize {
        0
    }

    fn sum_all(&self, _values: &mut [f64]) {}
}
