use portable_atomic::{AtomicBool, Ordering};

/// Admits one update at a time.
///
/// Lives in a `static` so every trigger path shares it.
#[derive(Debug)]
pub struct UpdateDispatcher {
    busy: AtomicBool,
}

/// Held for the whole attempt. Dropping it lets the next trigger in.
#[derive(Debug)]
pub struct UpdateSession<'d> {
    dispatcher: &'d UpdateDispatcher,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AlreadyRunning;

impl UpdateDispatcher {
    pub const fn new() -> Self {
        Self {
            busy: AtomicBool::new(false),
        }
    }

    pub fn try_begin(&self) -> Result<UpdateSession<'_>, AlreadyRunning> {
        match self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Ok(UpdateSession { dispatcher: self }),
            Err(_) => {
                log::warn!("update already in progress");
                Err(AlreadyRunning)
            }
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

impl Default for UpdateDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for UpdateSession<'_> {
    fn drop(&mut self) {
        self.dispatcher.busy.store(false, Ordering::Release);
    }
}
