//! One update attempt, start to finish.
//!
//! ```text
//!     PARSE_HEADER -> RESOLVE_BANK -> ERASE_TARGET -> STREAM_WRITE -> VERIFY
//!         -> COMMIT_SUCCESS | ROLLBACK_FAILURE
//! ```
//!
//! [`run_update`] drives any [`UpdateFlow`] through these stages. Nothing is
//! erased before a plan exists, so failures up to RESOLVE_BANK leave flash
//! alone. Every failure after that erases the first sector of the target.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embedded_io::{Read, Write};
use embedded_storage::nor_flash::NorFlash;
use ota_container::{TargetHeader, parse_target_header};

use crate::bank::{BankIndex, BankResolver, ConfigSlot, ConfigStore};
use crate::commit;
use crate::config::{FlowKind, OtaConfig};
use crate::error::{OtaError, OtaErrorKind};
use crate::flash::SharedFlash;
use crate::plan::DownloadPlan;
use crate::receive::{FileInfo, receive_header_block};
use crate::verify::verify_plan;
use crate::writer::{self, WriteSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UpdateStage {
    ParseHeader,
    ResolveBank,
    EraseTarget,
    StreamWrite,
    Verify,
    CommitSuccess,
    RollbackFailure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The new bank is committed. The caller resets the device.
    Reboot { bank: BankIndex },
    Failed {
        at: UpdateStage,
        error: OtaError,
        rolled_back: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateReport {
    /// Final state of the attempt.
    pub stage: UpdateStage,
    pub outcome: UpdateOutcome,
}

impl UpdateReport {
    pub fn is_reboot(&self) -> bool {
        matches!(self.outcome, UpdateOutcome::Reboot { .. })
    }

    pub fn error_kind(&self) -> Option<OtaErrorKind> {
        match &self.outcome {
            UpdateOutcome::Failed { error, .. } => Some(error.kind()),
            UpdateOutcome::Reboot { .. } => None,
        }
    }
}

/// A planning failure, tagged with the stage that raised it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanError {
    pub at: UpdateStage,
    pub error: OtaError,
}

impl PlanError {
    pub fn header(error: OtaError) -> Self {
        Self {
            at: UpdateStage::ParseHeader,
            error,
        }
    }

    pub fn resolve(error: OtaError) -> Self {
        Self {
            at: UpdateStage::ResolveBank,
            error,
        }
    }
}

/// The steps that differ between wire protocols.
pub trait UpdateFlow<S: Read> {
    /// Reads whatever precedes the image data and decides where it goes.
    /// Must not erase or write any bank.
    fn resolve_plan(&mut self, stream: &mut S) -> Result<DownloadPlan, PlanError>;

    fn erase_target(&mut self, plan: &DownloadPlan) -> Result<(), OtaError>;

    fn stream_and_write(
        &mut self,
        stream: &mut S,
        plan: &DownloadPlan,
    ) -> Result<WriteSummary, OtaError>;

    fn verify(&mut self, plan: &DownloadPlan, summary: &WriteSummary) -> Result<(), OtaError>;

    fn commit(&mut self, plan: &DownloadPlan, summary: &WriteSummary) -> Result<(), OtaError>;

    fn rollback(&mut self, plan: &DownloadPlan) -> Result<(), OtaError>;
}

pub fn run_update<S: Read, U: UpdateFlow<S>>(flow: &mut U, stream: &mut S) -> UpdateReport {
    let plan = match flow.resolve_plan(stream) {
        Ok(plan) => plan,
        Err(PlanError { at, error }) => {
            log::warn!("update failed at {:?}: {}", at, error);
            return UpdateReport {
                stage: at,
                outcome: UpdateOutcome::Failed {
                    at,
                    error,
                    rolled_back: false,
                },
            };
        }
    };

    if let Err(error) = flow.erase_target(&plan) {
        return roll_back(flow, &plan, UpdateStage::EraseTarget, error);
    }

    let summary = match flow.stream_and_write(stream, &plan) {
        Ok(summary) => summary,
        Err(error) => return roll_back(flow, &plan, UpdateStage::StreamWrite, error),
    };
    log::info!("received {} bytes", summary.received);

    if let Err(error) = flow.verify(&plan, &summary) {
        return roll_back(flow, &plan, UpdateStage::Verify, error);
    }

    if let Err(error) = flow.commit(&plan, &summary) {
        return roll_back(flow, &plan, UpdateStage::CommitSuccess, error);
    }

    UpdateReport {
        stage: UpdateStage::CommitSuccess,
        outcome: UpdateOutcome::Reboot {
            bank: plan.target_bank(),
        },
    }
}

fn roll_back<S: Read, U: UpdateFlow<S>>(
    flow: &mut U,
    plan: &DownloadPlan,
    at: UpdateStage,
    error: OtaError,
) -> UpdateReport {
    log::warn!("update failed at {:?}: {}", at, error);
    let rolled_back = match flow.rollback(plan) {
        Ok(()) => true,
        Err(rollback_error) => {
            log::error!("rollback failed: {}", rollback_error);
            false
        }
    };
    UpdateReport {
        stage: UpdateStage::RollbackFailure,
        outcome: UpdateOutcome::Failed {
            at,
            error,
            rolled_back,
        },
    }
}

/// Everything an attempt borrows for its lifetime.
pub struct UpdateContext<'a, 'f, M: RawMutex, F: NorFlash, C: ConfigStore> {
    pub flash: &'a SharedFlash<'f, M, F>,
    pub store: &'a mut C,
    pub config: &'a OtaConfig,
    /// Transfer buffer, owned by the attempt until it returns.
    pub buffer: &'a mut [u8],
    pub running: BankIndex,
}

impl<'a, 'f, M: RawMutex, F: NorFlash, C: ConfigStore> UpdateContext<'a, 'f, M, F, C> {
    fn erase_target(&mut self, plan: &DownloadPlan) -> Result<(), OtaError> {
        commit::erase_targets(self.flash, plan)
    }

    fn stream_and_write<S: Read>(
        &mut self,
        stream: &mut S,
        plan: &DownloadPlan,
    ) -> Result<WriteSummary, OtaError> {
        writer::stream_and_write(plan, stream, self.buffer, self.flash)
    }

    fn verify(&mut self, plan: &DownloadPlan, summary: &WriteSummary) -> Result<(), OtaError> {
        verify_plan(self.flash, plan, summary, self.buffer)
    }

    fn rollback(&mut self, plan: &DownloadPlan) -> Result<(), OtaError> {
        commit::rollback(self.flash, plan)
    }
}

/// Container flow: header block, inactive bank, signature written last.
pub struct SingleImageFlow<'a, 'f, M: RawMutex, F: NorFlash, C: ConfigStore> {
    context: UpdateContext<'a, 'f, M, F, C>,
    target: Option<TargetHeader>,
}

impl<'a, 'f, M: RawMutex, F: NorFlash, C: ConfigStore> SingleImageFlow<'a, 'f, M, F, C> {
    pub fn new(context: UpdateContext<'a, 'f, M, F, C>) -> Self {
        Self {
            context,
            target: None,
        }
    }

    /// Header of the container, once [`UpdateFlow::resolve_plan`] has run.
    pub fn target(&self) -> Option<&TargetHeader> {
        self.target.as_ref()
    }
}

impl<S: Read, M: RawMutex, F: NorFlash, C: ConfigStore> UpdateFlow<S>
    for SingleImageFlow<'_, '_, M, F, C>
{
    fn resolve_plan(&mut self, stream: &mut S) -> Result<DownloadPlan, PlanError> {
        let ctx = &mut self.context;
        if ctx.config.expect_file_info {
            FileInfo::receive(stream).map_err(PlanError::header)?;
        }

        let target_bank = ctx.running.other();
        let block = receive_header_block(stream, ctx.buffer).map_err(PlanError::header)?;
        let target = parse_target_header(block, target_bank.image_tag())
            .map_err(|error| PlanError::header(error.into()))?;
        log::info!(
            "container v{} with {} headers, {:?} image {} bytes at offset {}{}",
            target.file.version,
            target.file.header_count,
            target_bank,
            target.primary.image_len,
            target.primary.offset,
            if target.has_secondary() { ", with RDP" } else { "" }
        );

        let address = BankResolver::new(ctx.config).resolve(
            ctx.flash,
            &mut *ctx.store,
            ctx.running,
            &target.primary,
        )
        .map_err(PlanError::resolve)?;
        let plan = DownloadPlan::for_target(
            &target,
            target_bank,
            address,
            ctx.config.secondary_address,
        )
        .map_err(PlanError::resolve)?;
        self.target = Some(target);
        Ok(plan)
    }

    fn erase_target(&mut self, plan: &DownloadPlan) -> Result<(), OtaError> {
        self.context.erase_target(plan)
    }

    fn stream_and_write(
        &mut self,
        stream: &mut S,
        plan: &DownloadPlan,
    ) -> Result<WriteSummary, OtaError> {
        self.context.stream_and_write(stream, plan)
    }

    fn verify(&mut self, plan: &DownloadPlan, summary: &WriteSummary) -> Result<(), OtaError> {
        self.context.verify(plan, summary)
    }

    fn commit(&mut self, plan: &DownloadPlan, summary: &WriteSummary) -> Result<(), OtaError> {
        let signature = summary
            .signature
            .as_ref()
            .ok_or(OtaError::new(OtaErrorKind::InvalidLayout))?;
        commit::commit(
            self.context.flash,
            &mut *self.context.store,
            plan,
            Some(signature),
        )
    }

    fn rollback(&mut self, plan: &DownloadPlan) -> Result<(), OtaError> {
        self.context.rollback(plan)
    }
}

/// Raw image flow: one byte handshake, file info record, whole image
/// checksummed against the record.
pub struct LegacyFlow<'a, 'f, M: RawMutex, F: NorFlash, C: ConfigStore> {
    context: UpdateContext<'a, 'f, M, F, C>,
}

impl<'a, 'f, M: RawMutex, F: NorFlash, C: ConfigStore> LegacyFlow<'a, 'f, M, F, C> {
    pub fn new(context: UpdateContext<'a, 'f, M, F, C>) -> Self {
        Self { context }
    }
}

impl<S: Read + Write, M: RawMutex, F: NorFlash, C: ConfigStore> UpdateFlow<S>
    for LegacyFlow<'_, '_, M, F, C>
{
    fn resolve_plan(&mut self, stream: &mut S) -> Result<DownloadPlan, PlanError> {
        let ctx = &mut self.context;
        let resolver = BankResolver::new(ctx.config);
        let bank2 = ctx.config.default_bank2_address;
        resolver
            .check_bank2_address(bank2)
            .and_then(|()| resolver.check_bank2_clear_of_bank1(ctx.flash, bank2))
            .and_then(|()| ctx.store.write_u32(ConfigSlot::Bank2Address, bank2))
            .map_err(PlanError::resolve)?;

        let target_bank = ctx.running.other();
        let index = u8::try_from(target_bank.as_u32())
            .map_err(|_| PlanError::resolve(OtaError::new(OtaErrorKind::InvalidAddress)))?;
        stream
            .write_all(&[index])
            .and_then(|()| stream.flush())
            .map_err(|error| PlanError::header(OtaError::stream(error)))?;

        let info = FileInfo::receive(stream).map_err(PlanError::header)?;
        if info.size == 0 {
            log::warn!("file info carries no image size");
            return Err(PlanError::header(OtaError::new(
                OtaErrorKind::MalformedHeader,
            )));
        }

        let address = match target_bank {
            BankIndex::Bank1 => {
                resolver
                    .check_fits_bank1(bank2, info.size)
                    .map_err(PlanError::resolve)?;
                ctx.config.bank1_address
            }
            BankIndex::Bank2 => bank2,
        };
        log::info!(
            "{:?} update at {:#010x}, {} bytes",
            target_bank,
            address,
            info.size
        );
        DownloadPlan::raw_image(target_bank, address, info.size, info.checksum)
            .map_err(PlanError::resolve)
    }

    fn erase_target(&mut self, plan: &DownloadPlan) -> Result<(), OtaError> {
        self.context.erase_target(plan)
    }

    fn stream_and_write(
        &mut self,
        stream: &mut S,
        plan: &DownloadPlan,
    ) -> Result<WriteSummary, OtaError> {
        self.context.stream_and_write(stream, plan)
    }

    fn verify(&mut self, plan: &DownloadPlan, summary: &WriteSummary) -> Result<(), OtaError> {
        self.context.verify(plan, summary)
    }

    fn commit(&mut self, plan: &DownloadPlan, _summary: &WriteSummary) -> Result<(), OtaError> {
        commit::commit(self.context.flash, &mut *self.context.store, plan, None)
    }

    fn rollback(&mut self, plan: &DownloadPlan) -> Result<(), OtaError> {
        self.context.rollback(plan)
    }
}

/// Runs the flow named by `context.config.flow`.
pub fn run_configured<S, M, F, C>(
    context: UpdateContext<'_, '_, M, F, C>,
    stream: &mut S,
) -> UpdateReport
where
    S: Read + Write,
    M: RawMutex,
    F: NorFlash,
    C: ConfigStore,
{
    log::info!(
        "update start, running {:?}, {:?} flow",
        context.running,
        context.config.flow
    );
    let flow = context.config.flow;
    match flow {
        FlowKind::SingleImage => run_update(&mut SingleImageFlow::new(context), stream),
        FlowKind::Legacy => run_update(&mut LegacyFlow::new(context), stream),
    }
}
