use crate::model::EntryAction;

/// Estado de un step dentro de un intento.
///
/// Las transiciones válidas son:
/// - `Started` -> `Succeeded`
/// - `Started` -> `Errored`
/// - `Started` -> `Halted`
/// - `Started` -> `Repeated`
///
/// Cada estado se registra como una `Entry`; reintentos vuelven a `Started`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Started,
    Succeeded,
    Errored,
    Halted,
    Repeated,
}

impl StepStatus {
    pub fn action(self) -> EntryAction {
        match self {
            StepStatus::Started => EntryAction::Started,
            StepStatus::Succeeded => EntryAction::Succeeded,
            StepStatus::Errored => EntryAction::Errored,
            StepStatus::Halted => EntryAction::Halted,
            StepStatus::Repeated => EntryAction::Repeated,
        }
    }
}
