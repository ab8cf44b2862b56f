pub mod dispatcher;
pub mod lifecycle;
pub mod memory;
pub mod reaper;
pub mod reference;
pub mod transitions;

pub use dispatcher::{DispatchHandle, DispatchPolicy, DispatchReport, SideEffectDispatcher};
pub use lifecycle::{ExpireOutcome, GatewayPayment, LifecyclePolicy, QuoteLifecycle, SubmitQuote};
pub use memory::{InMemoryEffectOutbox, InMemoryPaymentRepository, InMemoryQuoteRepository};
pub use reaper::{DeadlineReaper, ReapReport};
pub use reference::ReferenceGenerator;
pub use transitions::{ApprovalTerms, SeatAdjustment};
