//! Linux userspace SPI (`/dev/spidevB.C`).

use anyhow::{anyhow, Context, Result};
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;

use super::sx127x::SpiBus;

// _IOW(SPI_IOC_MAGIC, nr, size) with SPI_IOC_MAGIC = 'k'.
const SPI_IOC_WR_MODE: u32 = 0x4001_6B01;
const SPI_IOC_WR_BITS_PER_WORD: u32 = 0x4001_6B03;
const SPI_IOC_WR_MAX_SPEED_HZ: u32 = 0x4004_6B04;
const SPI_IOC_MESSAGE_1: u32 = 0x4020_6B00;

const SPI_MODE_0: u8 = 0;

/// `struct spi_ioc_transfer` from linux/spi/spidev.h.
#[repr(C)]
#[derive(Default)]
struct SpiIocTransfer {
    tx_buf: u64,
    rx_buf: u64,
    len: u32,
    speed_hz: u32,
    delay_usecs: u16,
    bits_per_word: u8,
    cs_change: u8,
    tx_nbits: u8,
    rx_nbits: u8,
    word_delay_usecs: u8,
    pad: u8,
}

pub struct Spidev {
    path: String,
    file: Option<File>,
    speed_hz: u32,
}

impl Spidev {
    /// Open `path` in SPI mode 0, 8 bits per word.
    pub fn open(path: &str, speed_hz: u32) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("open spi device {}", path))?;
        let fd = file.as_raw_fd();

        let mode = SPI_MODE_0;
        ioctl_write(fd, SPI_IOC_WR_MODE, &mode).context("set spi mode")?;
        let bits: u8 = 8;
        ioctl_write(fd, SPI_IOC_WR_BITS_PER_WORD, &bits).context("set spi word size")?;
        ioctl_write(fd, SPI_IOC_WR_MAX_SPEED_HZ, &speed_hz).context("set spi speed")?;

        Ok(Self {
            path: path.to_string(),
            file: Some(file),
            speed_hz,
        })
    }
}

fn ioctl_write<T>(fd: i32, request: u32, value: &T) -> io::Result<()> {
    // SAFETY: `value` outlives the call and matches the size encoded in `request`.
    let rc = unsafe { libc::ioctl(fd, request as _, value as *const T) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

impl SpiBus for Spidev {
    fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<()> {
        if tx.len() != rx.len() {
            return Err(anyhow!(
                "spi transfer length mismatch: tx {} rx {}",
                tx.len(),
                rx.len()
            ));
        }
        let file = self
            .file
            .as_ref()
            .ok_or_else(|| anyhow!("spi device {} already released", self.path))?;

        let transfer = SpiIocTransfer {
            tx_buf: tx.as_ptr() as u64,
            rx_buf: rx.as_mut_ptr() as u64,
            len: tx.len() as u32,
            speed_hz: self.speed_hz,
            bits_per_word: 8,
            ..SpiIocTransfer::default()
        };
        ioctl_write(file.as_raw_fd(), SPI_IOC_MESSAGE_1, &transfer)
            .with_context(|| format!("spi transfer on {}", self.path))
    }

    fn release(&mut self) -> Result<()> {
        if self.file.take().is_some() {
            log::info!("spi: released {}", self.path);
        }
        Ok(())
    }
}
