//! Flash image platform, backed by the `esp-ota` crate.
//!
//! Flow: create_file → N × write_block → close_file → activate (reboot)
//!
//! On ESP-IDF targets the image goes to the inactive OTA partition through
//! `esp-ota`'s safe wrapper. On simulation targets it is kept in memory so
//! tests can inspect exactly what was written.

use log::{info, warn};

use crate::error::OtaError;
use crate::ota::{FileContext, ImageState, PlatformImageState};
use crate::app::ports::ImagePlatform;

const MAX_IMAGE_SIZE: u32 = 4 * 1024 * 1024; // 4 MB

// ── Transfer state ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Idle,
    Receiving { expected_size: u32, bytes_written: u32 },
    /// Image complete, not yet activated.
    Closed,
}

// ── Platform ──────────────────────────────────────────────────

pub struct FlashPal {
    transfer: TransferState,
    #[cfg(target_os = "espidf")]
    ota_update: Option<esp_ota::OtaUpdate>,
    #[cfg(target_os = "espidf")]
    completed: Option<esp_ota::CompletedOtaUpdate>,
    #[cfg(not(target_os = "espidf"))]
    image: Vec<u8>,
    #[cfg(not(target_os = "espidf"))]
    platform_state: PlatformImageState,
    #[cfg(not(target_os = "espidf"))]
    activations: u32,
}

impl FlashPal {
    pub fn new() -> Self {
        Self {
            transfer: TransferState::Idle,
            #[cfg(target_os = "espidf")]
            ota_update: None,
            #[cfg(target_os = "espidf")]
            completed: None,
            #[cfg(not(target_os = "espidf"))]
            image: Vec::new(),
            #[cfg(not(target_os = "espidf"))]
            platform_state: PlatformImageState::Valid,
            #[cfg(not(target_os = "espidf"))]
            activations: 0,
        }
    }

    pub fn transfer(&self) -> TransferState {
        self.transfer
    }
}

#[cfg(not(target_os = "espidf"))]
impl FlashPal {
    /// Simulate booting into an image in the given state.
    pub fn with_platform_state(state: PlatformImageState) -> Self {
        Self {
            platform_state: state,
            ..Self::new()
        }
    }

    /// Bytes written so far (or the closed image).
    pub fn image(&self) -> &[u8] {
        &self.image
    }

    pub fn activations(&self) -> u32 {
        self.activations
    }
}

impl Default for FlashPal {
    fn default() -> Self {
        Self::new()
    }
}

impl ImagePlatform for FlashPal {
    fn create_file(&mut self, file: &FileContext) -> Result<(), OtaError> {
        if matches!(self.transfer, TransferState::Receiving { .. }) {
            return Err(OtaError::AlreadyInProgress);
        }
        if file.file_size == 0 || file.file_size > MAX_IMAGE_SIZE {
            return Err(OtaError::InvalidSize);
        }

        #[cfg(target_os = "espidf")]
        {
            self.completed = None;
            let update = esp_ota::OtaUpdate::begin().map_err(|e| {
                warn!("esp-ota begin failed: {:?}", e);
                OtaError::BeginFailed
            })?;
            self.ota_update = Some(update);
        }
        #[cfg(not(target_os = "espidf"))]
        {
            self.image.clear();
            self.image.reserve(file.file_size as usize);
        }

        self.transfer = TransferState::Receiving {
            expected_size: file.file_size,
            bytes_written: 0,
        };
        info!("PAL: create '{}' ({} bytes)", file.file_path, file.file_size);
        Ok(())
    }

    fn write_block(&mut self, offset: u32, data: &[u8]) -> Result<(), OtaError> {
        let TransferState::Receiving {
            expected_size,
            bytes_written,
        } = self.transfer
        else {
            return Err(OtaError::NotReceiving);
        };

        if offset != bytes_written {
            return Err(OtaError::NonSequential);
        }
        if bytes_written + data.len() as u32 > expected_size {
            return Err(OtaError::Overflow);
        }

        #[cfg(target_os = "espidf")]
        {
            let Some(update) = self.ota_update.as_mut() else {
                return Err(OtaError::NotReceiving);
            };
            if let Err(e) = update.write(data) {
                warn!("esp-ota write failed: {:?}", e);
                self.ota_update = None;
                self.transfer = TransferState::Idle;
                return Err(OtaError::WriteFailed);
            }
        }
        #[cfg(not(target_os = "espidf"))]
        self.image.extend_from_slice(data);

        self.transfer = TransferState::Receiving {
            expected_size,
            bytes_written: bytes_written + data.len() as u32,
        };
        Ok(())
    }

    fn close_file(&mut self) -> Result<(), OtaError> {
        match self.transfer {
            TransferState::Receiving {
                expected_size,
                bytes_written,
            } if bytes_written == expected_size => {}
            TransferState::Receiving { .. } => return Err(OtaError::IncompleteTransfer),
            _ => return Err(OtaError::NotReceiving),
        }

        #[cfg(target_os = "espidf")]
        {
            let Some(update) = self.ota_update.take() else {
                self.transfer = TransferState::Idle;
                return Err(OtaError::NotReceiving);
            };
            let completed = update.finalize().map_err(|e| {
                warn!("esp-ota finalize failed: {:?}", e);
                self.transfer = TransferState::Idle;
                OtaError::VerifyFailed
            })?;
            self.completed = Some(completed);
        }

        self.transfer = TransferState::Closed;
        info!("PAL: image closed");
        Ok(())
    }

    fn abort(&mut self) -> Result<(), OtaError> {
        #[cfg(target_os = "espidf")]
        {
            // esp-ota aborts automatically when OtaUpdate is dropped
            self.ota_update.take();
            self.completed.take();
        }
        #[cfg(not(target_os = "espidf"))]
        self.image.clear();

        self.transfer = TransferState::Idle;
        warn!("PAL: image aborted");
        Ok(())
    }

    fn activate(&mut self) -> Result<(), OtaError> {
        if self.transfer != TransferState::Closed {
            return Err(OtaError::NotReceiving);
        }

        #[cfg(target_os = "espidf")]
        {
            let Some(mut completed) = self.completed.take() else {
                return Err(OtaError::NotReceiving);
            };
            completed.set_as_boot_partition().map_err(|e| {
                warn!("esp-ota set_as_boot_partition failed: {:?}", e);
                OtaError::BootSetFailed
            })?;
            info!("PAL: rebooting into new firmware");
            completed.restart();
        }

        #[cfg(not(target_os = "espidf"))]
        {
            self.activations += 1;
            self.platform_state = PlatformImageState::PendingCommit;
            info!("PAL: activate (simulation, no reboot)");
            Ok(())
        }
    }

    fn reset(&mut self) -> Result<(), OtaError> {
        #[cfg(target_os = "espidf")]
        {
            info!("PAL: reset");
            esp_ota::restart();
        }

        #[cfg(not(target_os = "espidf"))]
        {
            info!("PAL: reset (simulation, ignored)");
            Ok(())
        }
    }

    #[cfg(target_os = "espidf")]
    fn image_state(&self) -> PlatformImageState {
        use esp_idf_sys as sys;

        let mut state: sys::esp_ota_img_states_t = 0;
        // SAFETY: the running partition pointer comes from the partition
        // table and stays valid for the life of the program.
        let ret = unsafe {
            let running = sys::esp_ota_get_running_partition();
            sys::esp_ota_get_state_partition(running, &mut state)
        };
        if ret != sys::ESP_OK {
            return PlatformImageState::Unknown;
        }
        match state {
            sys::esp_ota_img_states_t_ESP_OTA_IMG_PENDING_VERIFY => PlatformImageState::PendingCommit,
            sys::esp_ota_img_states_t_ESP_OTA_IMG_VALID | sys::esp_ota_img_states_t_ESP_OTA_IMG_UNDEFINED => {
                PlatformImageState::Valid
            }
            sys::esp_ota_img_states_t_ESP_OTA_IMG_INVALID | sys::esp_ota_img_states_t_ESP_OTA_IMG_ABORTED => {
                PlatformImageState::Invalid
            }
            _ => PlatformImageState::Unknown,
        }
    }

    #[cfg(not(target_os = "espidf"))]
    fn image_state(&self) -> PlatformImageState {
        self.platform_state
    }

    fn set_image_state(&mut self, state: ImageState) -> Result<(), OtaError> {
        match state {
            ImageState::Testing => Ok(()),
            ImageState::Aborted => self.abort(),
            #[cfg(target_os = "espidf")]
            ImageState::Accepted => esp_ota::mark_app_valid().map_err(|e| {
                warn!("PAL: mark_app_valid failed: {:?}", e);
                OtaError::ImageStateFailed
            }),
            #[cfg(target_os = "espidf")]
            ImageState::Rejected => {
                if let Err(e) = esp_ota::rollback_and_reboot() {
                    warn!("PAL: rollback failed: {:?}", e);
                }
                Err(OtaError::ImageStateFailed)
            }
            #[cfg(not(target_os = "espidf"))]
            ImageState::Accepted => {
                self.platform_state = PlatformImageState::Valid;
                Ok(())
            }
            #[cfg(not(target_os = "espidf"))]
            ImageState::Rejected => {
                self.platform_state = PlatformImageState::Invalid;
                Ok(())
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────
