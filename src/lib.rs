pub mod config;
pub mod dispatcher;
pub mod domain;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod ledger;
pub mod logging;
pub mod params;
pub mod registry;

pub use config::AppConfig;
pub use dispatcher::{BatchReport, DispatchStats, TickDispatcher, UserProcessor, UserReport};
pub use domain::{
    CyclePhase, EngineEvent, Instrument, InstrumentBook, InstrumentView, OptionKind,
    OrderAccepted, OrderFill, Tick, TickSnapshot, TradeAction,
};
pub use engine::{CycleEngine, UserOutcome};
pub use error::{Result, StraddleError};
pub use gateway::{build_gateway, Credentials, PaperGateway, TradingGateway};
pub use ledger::{CompletionMethod, CycleFact, FactLog, PayloadKind, COMPLETION_QUORUM};
pub use params::{ParamKind, ParamScope, ParamValue, ParameterStore};
pub use registry::StrategyRegistry;
