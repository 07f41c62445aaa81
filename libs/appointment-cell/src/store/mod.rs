// libs/appointment-cell/src/store/mod.rs
use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{Appointment, AppointmentError, AppointmentFilter, AppointmentUpdate, TimeInterval};

pub mod memory;
pub mod supabase;

pub use memory::InMemoryAppointmentStore;
pub use supabase::SupabaseAppointmentStore;

/// Persistence port for appointments.
///
/// Every call is scoped to one tenant; records of other tenants are invisible.
/// Implementations must make the overlap check and the write a single atomic
/// step per provider, so two concurrent writers can never both commit
/// overlapping active appointments.
#[async_trait]
pub trait AppointmentStore: Send + Sync {
    /// Persist a new appointment.
    ///
    /// Fails with `Conflict { reason: Overlap }` when an active appointment of
    /// the same provider overlaps it.
    async fn insert(&self, appointment: Appointment) -> Result<Appointment, AppointmentError>;

    /// Apply `update` if the stored version still equals
    /// `update.expected_version`, returning the new state.
    ///
    /// A stale version yields `Conflict { reason: StaleVersion }`; a reschedule
    /// onto an occupied interval yields `Conflict { reason: Overlap }`.
    async fn update(
        &self,
        tenant_id: Uuid,
        appointment_id: Uuid,
        update: AppointmentUpdate,
    ) -> Result<Appointment, AppointmentError>;

    async fn get(&self, tenant_id: Uuid, appointment_id: Uuid) -> Result<Option<Appointment>, AppointmentError>;

    /// Active appointments of a provider overlapping `window`, ordered by start.
    async fn list_active(
        &self,
        tenant_id: Uuid,
        provider_id: Uuid,
        window: TimeInterval,
    ) -> Result<Vec<Appointment>, AppointmentError>;

    /// Appointments of any status matching `filter`, ordered by start.
    async fn list_by_date_range(
        &self,
        tenant_id: Uuid,
        filter: &AppointmentFilter,
    ) -> Result<Vec<Appointment>, AppointmentError>;
}
