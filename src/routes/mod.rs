pub mod chat_routes;
pub mod report_routes;
pub mod voice_routes;

use crate::pipeline::PipelineExecutor;
use crate::service::report_service::ReportService;
use crate::service::turn_service::TurnService;
use crate::stream_guard::StreamGuard;

#[derive(Clone)]
pub struct AppState {
    pub turns: TurnService,
    pub reports: ReportService,
    pub pipeline: PipelineExecutor,
    pub stream_guard: StreamGuard,
}
