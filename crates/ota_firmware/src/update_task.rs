use embassy_sync::blocking_mutex::raw::RawMutex;
use embedded_io::{Read, Write};
use embedded_storage::nor_flash::NorFlash;
use ota_engine::http::HttpBody;
use ota_engine::session::UpdateSession;
use ota_engine::{
    ConfigStore, UpdateContext, UpdateOutcome, UpdateReport, UpdateStage, run_configured,
};

/// Restarts the device into whatever bank is marked active.
pub trait Reset {
    fn reset_device(&mut self) -> !;
}

/// Runs an accepted update over an open connection.
///
/// The session is released before anything else happens. On success the
/// device is reset and this never returns. A failed attempt hands back its
/// report so the caller can log it and keep running the current image.
pub fn execute_update<S, M, F, C, R>(
    session: UpdateSession<'_>,
    context: UpdateContext<'_, '_, M, F, C>,
    stream: &mut S,
    reset: &mut R,
) -> UpdateReport
where
    S: Read + Write,
    M: RawMutex,
    F: NorFlash,
    C: ConfigStore,
    R: Reset,
{
    let report = run_configured(context, stream);
    finish(session, report, reset)
}

/// Like [`execute_update`], for a connection whose request has been sent and
/// whose response head has not been read yet.
pub fn execute_http_update<S, M, F, C, R>(
    session: UpdateSession<'_>,
    context: UpdateContext<'_, '_, M, F, C>,
    stream: S,
    reset: &mut R,
) -> UpdateReport
where
    S: Read + Write,
    M: RawMutex,
    F: NorFlash,
    C: ConfigStore,
    R: Reset,
{
    let mut body = HttpBody::new(stream);
    let report = match body.read_head() {
        Ok(len) => {
            log::info!("downloading {} bytes over http", len);
            run_configured(context, &mut body)
        }
        Err(error) => UpdateReport {
            stage: UpdateStage::ParseHeader,
            outcome: UpdateOutcome::Failed {
                at: UpdateStage::ParseHeader,
                error,
                rolled_back: false,
            },
        },
    };
    finish(session, report, reset)
}

fn finish<R: Reset>(session: UpdateSession<'_>, report: UpdateReport, reset: &mut R) -> UpdateReport {
    drop(session);
    if let UpdateOutcome::Reboot { bank } = report.outcome {
        log::info!("update committed, resetting into {:?}", bank);
        reset.reset_device();
    }
    if let UpdateOutcome::Failed {
        at,
        error,
        rolled_back,
    } = &report.outcome
    {
        log::error!(
            "update failed at {:?}: {} (rolled back: {})",
            at,
            error,
            rolled_back
        );
    }
    report
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use core::cell::RefCell;
    use embassy_sync::blocking_mutex::{Mutex, raw::NoopRawMutex};
    use embedded_io::{ErrorKind, ErrorType};
    use ota_container::ImageTag;
    use ota_container::builder::ContainerBuilder;
    use ota_engine::mem_storage::{MemConfig, MemFlash};
    use ota_engine::{BankIndex, OtaConfig, OtaErrorKind, SharedFlash, UpdateDispatcher};

    const BASE: u32 = 0x0800_0000;
    const BANK1: u32 = 0x0800_1000;
    const BANK2: u32 = 0x0800_4000;
    const FLASH_BYTES: usize = 0x8000;

    struct PanicReset;

    impl Reset for PanicReset {
        fn reset_device(&mut self) -> ! {
            panic!("device reset");
        }
    }

    struct Socket {
        data: std::vec::Vec<u8>,
        pos: usize,
    }

    impl ErrorType for Socket {
        type Error = ErrorKind;
    }

    impl Read for Socket {
        fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
            let count = buf.len().min(9).min(self.data.len() - self.pos);
            buf[..count].copy_from_slice(&self.data[self.pos..self.pos + count]);
            self.pos += count;
            Ok(count)
        }
    }

    impl Write for Socket {
        fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> Result<(), Self::Error> {
            Ok(())
        }
    }

    fn config() -> OtaConfig {
        let mut config = OtaConfig::new();
        config.flash_base = BASE;
        config.bank1_address = BANK1;
        config.default_bank2_address = BANK2;
        config.secondary_address = 0x0800_6000;
        config
    }

    fn container() -> std::vec::Vec<u8> {
        let image: std::vec::Vec<u8> = (0u8..96).collect();
        let mut builder = ContainerBuilder::new(1);
        builder
            .push(ImageTag::OTA2, BANK2, &image)
            .expect("push");
        let mut out = std::vec![0u8; builder.total_len().expect("len")];
        builder.build_into(&mut out).expect("build");
        out
    }

    fn run(socket_data: std::vec::Vec<u8>, http: bool) -> (UpdateReport, MemConfig) {
        let mut storage = std::vec![0u8; FLASH_BYTES];
        let mut mem = MemFlash::new(&mut storage);
        // bank 1 image of 0x100 bytes followed by 0x40 bytes of data
        let image = (BANK1 - BASE) as usize;
        mem.bytes_mut()[image + 8..image + 12].copy_from_slice(&0x100u32.to_le_bytes());
        let data = image + 0x100 + 0x20;
        mem.bytes_mut()[data + 8..data + 12].copy_from_slice(&0x40u32.to_le_bytes());
        let mutex = Mutex::<NoopRawMutex, _>::new(RefCell::new(mem));
        let flash = SharedFlash::new(&mutex, BASE).expect("flash");
        let config = config();
        let mut store = MemConfig::new();
        let mut buffer = [0u8; 128];
        let dispatcher = UpdateDispatcher::new();
        let session = dispatcher.try_begin().expect("session");
        let context = UpdateContext {
            flash: &flash,
            store: &mut store,
            config: &config,
            buffer: &mut buffer,
            running: BankIndex::Bank1,
        };
        let socket = Socket {
            data: socket_data,
            pos: 0,
        };
        let report = if http {
            execute_http_update(session, context, socket, &mut PanicReset)
        } else {
            let mut socket = socket;
            execute_update(session, context, &mut socket, &mut PanicReset)
        };
        assert!(!dispatcher.is_busy());
        (report, store)
    }

    #[test]
    #[should_panic(expected = "device reset")]
    fn committed_update_resets() {
        run(container(), false);
    }

    #[test]
    #[should_panic(expected = "device reset")]
    fn committed_http_update_resets() {
        let body = container();
        let mut data = std::format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n", body.len())
            .into_bytes();
        data.extend_from_slice(&body);
        run(data, true);
    }

    #[test]
    fn failed_update_returns_report_and_frees_session() {
        let mut data = container();
        data.truncate(data.len() - 10);
        let (report, store) = run(data, false);

        assert_eq!(report.error_kind(), Some(OtaErrorKind::StreamTruncated));
        assert_eq!(report.stage, UpdateStage::RollbackFailure);
        assert_eq!(store.active_bank, ota_engine::config::ERASED_WORD);
    }

    #[test]
    fn http_error_status_fails_before_flash() {
        let data = b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n".to_vec();
        let (report, store) = run(data, true);

        assert_eq!(report.error_kind(), Some(OtaErrorKind::HttpStatus));
        assert_eq!(report.stage, UpdateStage::ParseHeader);
        assert_eq!(store.writes, 0);
    }
}
