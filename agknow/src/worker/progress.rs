/// Percentage of processed items, reported only when it grows.
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    total: usize,
    processed: usize,
    percentage: u8,
}

impl ProgressTracker {
    pub fn new(total: usize) -> Self {
        ProgressTracker {
            total,
            processed: 0,
            percentage: 0,
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn percentage(&self) -> u8 {
        self.percentage
    }

    /// Count one more processed item.
    ///
    /// Returns the new percentage, `floor(processed * 100 / total)`, when it
    /// is higher than the last one returned.
    pub fn advance(&mut self) -> Option<u8> {
        self.processed += 1;
        if self.total == 0 {
            return None;
        }
        let current = (self.processed.min(self.total) * 100 / self.total) as u8;
        if current > self.percentage {
            self.percentage = current;
            Some(current)
        } else {
            None
        }
    }
}
