//! Task Watchdog Timer (TWDT) driver.
//!
//! Wraps the ESP-IDF TWDT API to reset the gateway if the radio task
//! stalls longer than the configured timeout.  The radio loop calls
//! `feed()` once per iteration; each iteration is bounded by the poll
//! interval plus one transmit.
//!
//! On the host the watchdog only counts feeds.

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

use core::sync::atomic::{AtomicU32, Ordering};

use log::info;

pub struct Watchdog {
    #[cfg(target_os = "espidf")]
    subscribed: bool,
    feeds: AtomicU32,
}

impl Watchdog {
    /// Initialise the TWDT and subscribe the calling task.
    pub fn new(timeout_secs: u32) -> Self {
        #[cfg(target_os = "espidf")]
        {
            unsafe {
                let cfg = esp_task_wdt_config_t {
                    timeout_ms: timeout_secs.saturating_mul(1000),
                    idle_core_mask: 0,
                    trigger_panic: true,
                };
                let ret = esp_task_wdt_reconfigure(&cfg);
                if ret != ESP_OK {
                    log::warn!(
                        "TWDT reconfigure returned {} (may already be configured)",
                        ret
                    );
                }

                let ret = esp_task_wdt_add(core::ptr::null_mut());
                let subscribed = ret == ESP_OK;
                if subscribed {
                    info!("Watchdog: radio task subscribed ({}s timeout)", timeout_secs);
                } else {
                    log::warn!("Watchdog: failed to subscribe ({})", ret);
                }

                Self {
                    subscribed,
                    feeds: AtomicU32::new(0),
                }
            }
        }

        #[cfg(not(target_os = "espidf"))]
        {
            info!("Watchdog(sim): {}s timeout, not enforced", timeout_secs);
            Self {
                feeds: AtomicU32::new(0),
            }
        }
    }

    /// Feed the watchdog.
    pub fn feed(&self) {
        self.feeds.fetch_add(1, Ordering::Relaxed);

        #[cfg(target_os = "espidf")]
        {
            if self.subscribed {
                unsafe {
                    esp_task_wdt_reset();
                }
            }
        }
    }

    /// Feeds since creation.
    pub fn feed_count(&self) -> u32 {
        self.feeds.load(Ordering::Relaxed)
    }
}
