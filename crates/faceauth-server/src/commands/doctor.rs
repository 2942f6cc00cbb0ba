use std::any::Any;
use std::process::ExitCode;

use async_trait::async_trait;

use crate::cli::{ConfigArgs, OutputMode};
use crate::commands::CommandHandler;
use crate::doctor::{self, DoctorOutcome};
use crate::errors::AppResult;
use crate::output::render_doctor;

pub struct DoctorHandler {
    options: ConfigArgs,
    run_doctor: Box<dyn Fn(&ConfigArgs) -> AppResult<DoctorOutcome> + Send + Sync>,
    render: Box<dyn Fn(&DoctorOutcome, OutputMode) -> AppResult<()> + Send + Sync>,
}

impl DoctorHandler {
    pub fn new(options: ConfigArgs) -> Self {
        Self::with_dependencies(options, doctor::run_doctor, render_doctor)
    }

    pub fn with_dependencies(
        options: ConfigArgs,
        run_doctor: impl Fn(&ConfigArgs) -> AppResult<DoctorOutcome> + Send + Sync + 'static,
        render: impl Fn(&DoctorOutcome, OutputMode) -> AppResult<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            options,
            run_doctor: Box::new(run_doctor),
            render: Box::new(render),
        }
    }
}

#[async_trait]
impl CommandHandler for DoctorHandler {
    async fn execute(&self, mode: OutputMode, _verbose: bool) -> AppResult<ExitCode> {
        let outcome = (self.run_doctor)(&self.options)?;
        (self.render)(&outcome, mode)?;
        let exit = if outcome.ok {
            ExitCode::SUCCESS
        } else {
            ExitCode::from(1)
        };
        Ok(exit)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
