//! Connection quality monitor.

use avatar_protocol::ConnectionQuality;

/// Last-received-wins view of `connection-quality-changed` events.
///
/// Lives inside the lifecycle record so a session reset clears it in the
/// same step as the rest of the session state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QualityMonitor {
	current: ConnectionQuality,
	updates: u64,
}

impl QualityMonitor {
	/// Records a new reading; returns whether the displayed value changed.
	pub fn observe(&mut self, quality: ConnectionQuality) -> bool {
		self.updates += 1;
		let changed = self.current != quality;
		self.current = quality;
		changed
	}

	pub fn current(&self) -> ConnectionQuality {
		self.current
	}

	/// Readings received since the last reset.
	pub fn updates(&self) -> u64 {
		self.updates
	}

	pub fn reset(&mut self) {
		*self = Self::default();
	}
}
