//! SX1276/77/78/79 LoRa driver.
//!
//! Talks to the chip through single-register and FIFO burst transfers on an
//! `SpiBus`. Register reads clear the address MSB, writes set it.

use anyhow::{anyhow, Context, Result};

use super::{LoraSettings, RadioMode, RadioTransport};

const REG_FIFO: u8 = 0x00;
const REG_OP_MODE: u8 = 0x01;
const REG_FRF_MSB: u8 = 0x06;
const REG_FRF_MID: u8 = 0x07;
const REG_FRF_LSB: u8 = 0x08;
const REG_PA_CONFIG: u8 = 0x09;
const REG_FIFO_ADDR_PTR: u8 = 0x0D;
const REG_FIFO_TX_BASE_ADDR: u8 = 0x0E;
const REG_FIFO_RX_BASE_ADDR: u8 = 0x0F;
const REG_FIFO_RX_CURRENT_ADDR: u8 = 0x10;
const REG_IRQ_FLAGS: u8 = 0x12;
const REG_RX_NB_BYTES: u8 = 0x13;
const REG_MODEM_CONFIG_1: u8 = 0x1D;
const REG_MODEM_CONFIG_2: u8 = 0x1E;
const REG_PREAMBLE_MSB: u8 = 0x20;
const REG_PREAMBLE_LSB: u8 = 0x21;
const REG_PAYLOAD_LENGTH: u8 = 0x22;
const REG_MODEM_CONFIG_3: u8 = 0x26;
const REG_DETECTION_OPTIMIZE: u8 = 0x31;
const REG_DETECTION_THRESHOLD: u8 = 0x37;
const REG_SYNC_WORD: u8 = 0x39;
const REG_DIO_MAPPING_1: u8 = 0x40;
const REG_DIO_MAPPING_2: u8 = 0x41;
const REG_VERSION: u8 = 0x42;

const EXPECTED_VERSION: u8 = 0x12;

const MODE_LONG_RANGE: u8 = 0x80;
const MODE_SLEEP: u8 = 0x00;
const MODE_STDBY: u8 = 0x01;
const MODE_TX: u8 = 0x03;
const MODE_RX_CONTINUOUS: u8 = 0x05;

const IRQ_TX_DONE: u8 = 0x08;
const IRQ_VALID_HEADER: u8 = 0x10;
const IRQ_PAYLOAD_CRC_ERROR: u8 = 0x20;
const IRQ_RX_DONE: u8 = 0x40;

const PA_BOOST: u8 = 0x80;
const MC2_RX_PAYLOAD_CRC_ON: u8 = 0x04;
const MC3_AGC_AUTO_ON: u8 = 0x04;
const MC3_LOW_DATA_RATE_OPTIMIZE: u8 = 0x08;

const FIFO_TX_BASE: u8 = 0x80;
const FIFO_RX_BASE: u8 = 0x00;

/// Largest payload a single LoRa packet carries.
pub const MAX_PAYLOAD: usize = 255;

const CRYSTAL_HZ: f64 = 32_000_000.0;

/// Full-duplex SPI with chip-select held for the whole transfer.
pub trait SpiBus: Send {
    /// Clock out `tx` while filling `rx`; both slices have the same length.
    fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<()>;

    fn release(&mut self) -> Result<()> {
        Ok(())
    }
}

pub struct Sx127x<B: SpiBus> {
    bus: B,
    settings: LoraSettings,
}

/// Three FRF register bytes for a carrier frequency.
pub fn frequency_registers(frequency_mhz: f64) -> [u8; 3] {
    let frf = ((frequency_mhz * 1_000_000.0) * f64::from(1u32 << 19) / CRYSTAL_HZ).round() as u32;
    [(frf >> 16) as u8, (frf >> 8) as u8, frf as u8]
}

impl<B: SpiBus> Sx127x<B> {
    /// Check the silicon revision and apply `settings`. Leaves the radio in standby.
    pub fn init(bus: B, settings: LoraSettings) -> Result<Self> {
        settings.validate()?;
        let mut radio = Self { bus, settings };

        let version = radio.read_register(REG_VERSION)?;
        if version != EXPECTED_VERSION {
            return Err(anyhow!(
                "unexpected SX127x version 0x{:02X} (expected 0x{:02X})",
                version,
                EXPECTED_VERSION
            ));
        }

        // LoRa mode can only be selected while asleep.
        radio.write_register(REG_OP_MODE, MODE_LONG_RANGE | MODE_SLEEP)?;
        radio.write_register(REG_DIO_MAPPING_1, 0x00)?;
        radio.write_register(REG_DIO_MAPPING_2, 0x00)?;
        radio.configure().context("configure modem")?;
        radio.write_register(REG_OP_MODE, MODE_LONG_RANGE | MODE_STDBY)?;
        Ok(radio)
    }

    fn configure(&mut self) -> Result<()> {
        let settings = self.settings.clone();

        let pa = self.read_register(REG_PA_CONFIG)?;
        self.write_register(REG_PA_CONFIG, pa | PA_BOOST)?;

        let [msb, mid, lsb] = frequency_registers(settings.frequency_mhz);
        self.write_register(REG_FRF_MSB, msb)?;
        self.write_register(REG_FRF_MID, mid)?;
        self.write_register(REG_FRF_LSB, lsb)?;

        // Explicit header mode.
        let bw = settings.bandwidth_code()?;
        let cr = settings.coding_rate - 4;
        self.write_register(REG_MODEM_CONFIG_1, (bw << 4) | (cr << 1))?;

        let mc2 = self.read_register(REG_MODEM_CONFIG_2)? & 0x03;
        let crc = if settings.crc { MC2_RX_PAYLOAD_CRC_ON } else { 0 };
        self.write_register(
            REG_MODEM_CONFIG_2,
            (settings.spreading_factor << 4) | crc | mc2,
        )?;

        let mut mc3 = MC3_AGC_AUTO_ON;
        if settings.spreading_factor >= 11 {
            mc3 |= MC3_LOW_DATA_RATE_OPTIMIZE;
        }
        self.write_register(REG_MODEM_CONFIG_3, mc3)?;

        let (optimize, threshold) = if settings.spreading_factor == 6 {
            (0xC5, 0x0C)
        } else {
            (0xC3, 0x0A)
        };
        self.write_register(REG_DETECTION_OPTIMIZE, optimize)?;
        self.write_register(REG_DETECTION_THRESHOLD, threshold)?;

        let [pre_msb, pre_lsb] = settings.preamble.to_be_bytes();
        self.write_register(REG_PREAMBLE_MSB, pre_msb)?;
        self.write_register(REG_PREAMBLE_LSB, pre_lsb)?;
        self.write_register(REG_SYNC_WORD, settings.sync_word)?;

        self.write_register(REG_FIFO_TX_BASE_ADDR, FIFO_TX_BASE)?;
        self.write_register(REG_FIFO_RX_BASE_ADDR, FIFO_RX_BASE)?;
        Ok(())
    }

    fn read_register(&mut self, address: u8) -> Result<u8> {
        let mut rx = [0u8; 2];
        self.bus
            .transfer(&[address & 0x7F, 0x00], &mut rx)
            .with_context(|| format!("read register 0x{:02X}", address))?;
        Ok(rx[1])
    }

    fn write_register(&mut self, address: u8, value: u8) -> Result<()> {
        let mut rx = [0u8; 2];
        self.bus
            .transfer(&[address | 0x80, value], &mut rx)
            .with_context(|| format!("write register 0x{:02X}", address))
    }

    fn write_fifo(&mut self, payload: &[u8]) -> Result<()> {
        let mut tx = Vec::with_capacity(payload.len() + 1);
        tx.push(REG_FIFO | 0x80);
        tx.extend_from_slice(payload);
        let mut rx = vec![0u8; tx.len()];
        self.bus.transfer(&tx, &mut rx).context("write FIFO")
    }

    fn read_fifo(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut tx = vec![0u8; len + 1];
        tx[0] = REG_FIFO & 0x7F;
        let mut rx = vec![0u8; len + 1];
        self.bus.transfer(&tx, &mut rx).context("read FIFO")?;
        rx.remove(0);
        Ok(rx)
    }
}

impl<B: SpiBus> RadioTransport for Sx127x<B> {
    fn name(&self) -> &'static str {
        "sx127x"
    }

    fn set_mode(&mut self, mode: RadioMode) -> Result<()> {
        let bits = match mode {
            RadioMode::Sleep => MODE_SLEEP,
            RadioMode::Standby => MODE_STDBY,
            RadioMode::Transmit => MODE_TX,
            RadioMode::ReceiveContinuous => {
                self.write_register(REG_FIFO_ADDR_PTR, FIFO_RX_BASE)?;
                MODE_RX_CONTINUOUS
            }
        };
        self.write_register(REG_OP_MODE, MODE_LONG_RANGE | bits)
    }

    fn write_payload(&mut self, payload: &[u8]) -> Result<()> {
        if payload.is_empty() || payload.len() > MAX_PAYLOAD {
            return Err(anyhow!(
                "payload length {} outside 1..={}",
                payload.len(),
                MAX_PAYLOAD
            ));
        }
        // FIFO is only accessible outside sleep.
        self.write_register(REG_OP_MODE, MODE_LONG_RANGE | MODE_STDBY)?;
        self.write_register(REG_FIFO_ADDR_PTR, FIFO_TX_BASE)?;
        self.write_fifo(payload)?;
        self.write_register(REG_PAYLOAD_LENGTH, payload.len() as u8)
    }

    fn tx_done(&mut self) -> Result<bool> {
        Ok(self.read_register(REG_IRQ_FLAGS)? & IRQ_TX_DONE != 0)
    }

    fn clear_tx_done(&mut self) -> Result<()> {
        self.write_register(REG_IRQ_FLAGS, IRQ_TX_DONE)
    }

    fn take_received(&mut self) -> Result<Option<Vec<u8>>> {
        let flags = self.read_register(REG_IRQ_FLAGS)?;
        if flags & IRQ_RX_DONE == 0 {
            return Ok(None);
        }
        self.write_register(
            REG_IRQ_FLAGS,
            IRQ_RX_DONE | IRQ_VALID_HEADER | IRQ_PAYLOAD_CRC_ERROR,
        )?;
        if self.settings.crc && flags & IRQ_PAYLOAD_CRC_ERROR != 0 {
            return Err(anyhow!("received packet failed CRC"));
        }

        let len = self.read_register(REG_RX_NB_BYTES)? as usize;
        let start = self.read_register(REG_FIFO_RX_CURRENT_ADDR)?;
        self.write_register(REG_FIFO_ADDR_PTR, start)?;
        let packet = self.read_fifo(len)?;
        Ok(Some(packet))
    }

    fn release(&mut self) -> Result<()> {
        self.bus.release()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Chip {
        registers: Vec<u8>,
        writes: Vec<(u8, u8)>,
        fifo_written: Vec<u8>,
        fifo_pending: VecDeque<u8>,
        released: bool,
    }

    #[derive(Clone)]
    struct FakeBus(Arc<Mutex<Chip>>);

    impl FakeBus {
        fn new() -> Self {
            let mut chip = Chip {
                registers: vec![0u8; 0x80],
                ..Chip::default()
            };
            chip.registers[REG_VERSION as usize] = EXPECTED_VERSION;
            chip.registers[REG_MODEM_CONFIG_2 as usize] = 0x70;
            chip.registers[REG_PA_CONFIG as usize] = 0x4F;
            Self(Arc::new(Mutex::new(chip)))
        }

        fn register(&self, address: u8) -> u8 {
            self.0.lock().unwrap().registers[address as usize]
        }

        fn set_register(&self, address: u8, value: u8) {
            self.0.lock().unwrap().registers[address as usize] = value;
        }
    }

    impl SpiBus for FakeBus {
        fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<()> {
            assert_eq!(tx.len(), rx.len());
            let mut chip = self.0.lock().unwrap();
            let address = tx[0] & 0x7F;
            let write = tx[0] & 0x80 != 0;
            match (address, write) {
                (REG_FIFO, true) => chip.fifo_written.extend_from_slice(&tx[1..]),
                (REG_FIFO, false) => {
                    for slot in rx.iter_mut().skip(1) {
                        *slot = chip.fifo_pending.pop_front().unwrap_or(0);
                    }
                }
                (REG_IRQ_FLAGS, true) => {
                    chip.registers[address as usize] &= !tx[1];
                    chip.writes.push((address, tx[1]));
                }
                (_, true) => {
                    chip.registers[address as usize] = tx[1];
                    chip.writes.push((address, tx[1]));
                }
                (_, false) => rx[1] = chip.registers[address as usize],
            }
            Ok(())
        }

        fn release(&mut self) -> Result<()> {
            self.0.lock().unwrap().released = true;
            Ok(())
        }
    }

    #[test]
    fn frequency_bytes_for_915_mhz() {
        assert_eq!(frequency_registers(915.0), [0xE4, 0xC0, 0x00]);
        assert_eq!(frequency_registers(868.0), [0xD9, 0x00, 0x00]);
    }

    #[test]
    fn init_programs_default_modem() -> Result<()> {
        let bus = FakeBus::new();
        Sx127x::init(bus.clone(), LoraSettings::default())?;

        assert_eq!(bus.register(REG_MODEM_CONFIG_1), 0x72);
        assert_eq!(bus.register(REG_MODEM_CONFIG_2), 0x74);
        assert_eq!(bus.register(REG_MODEM_CONFIG_3), 0x04);
        assert_eq!(bus.register(REG_SYNC_WORD), 0x12);
        assert_eq!(bus.register(REG_PREAMBLE_LSB), 8);
        assert_eq!(bus.register(REG_PA_CONFIG), 0xCF);
        assert_eq!(bus.register(REG_FRF_MSB), 0xE4);
        assert_eq!(bus.register(REG_OP_MODE), MODE_LONG_RANGE | MODE_STDBY);

        let writes = bus.0.lock().unwrap().writes.clone();
        assert_eq!(writes[0], (REG_OP_MODE, MODE_LONG_RANGE | MODE_SLEEP));
        Ok(())
    }

    #[test]
    fn high_spreading_factor_enables_low_data_rate_optimize() -> Result<()> {
        let bus = FakeBus::new();
        let settings = LoraSettings {
            spreading_factor: 12,
            ..LoraSettings::default()
        };
        Sx127x::init(bus.clone(), settings)?;
        assert_eq!(bus.register(REG_MODEM_CONFIG_2), 0xC4);
        assert_eq!(bus.register(REG_MODEM_CONFIG_3), 0x0C);
        Ok(())
    }

    #[test]
    fn wrong_silicon_version_fails_init() {
        let bus = FakeBus::new();
        bus.set_register(REG_VERSION, 0x22);
        assert!(Sx127x::init(bus, LoraSettings::default()).is_err());
    }

    #[test]
    fn transmit_path_loads_fifo_and_clears_flag() -> Result<()> {
        let bus = FakeBus::new();
        let mut radio = Sx127x::init(bus.clone(), LoraSettings::default())?;

        radio.write_payload(b"ABC-123DE")?;
        radio.set_mode(RadioMode::Transmit)?;
        assert_eq!(bus.0.lock().unwrap().fifo_written, b"ABC-123DE".to_vec());
        assert_eq!(bus.register(REG_PAYLOAD_LENGTH), 9);
        assert_eq!(bus.register(REG_FIFO_ADDR_PTR), FIFO_TX_BASE);
        assert_eq!(bus.register(REG_OP_MODE), MODE_LONG_RANGE | MODE_TX);

        assert!(!radio.tx_done()?);
        bus.set_register(REG_IRQ_FLAGS, IRQ_TX_DONE);
        assert!(radio.tx_done()?);
        radio.clear_tx_done()?;
        assert!(!radio.tx_done()?);
        Ok(())
    }

    #[test]
    fn oversize_payload_is_rejected() -> Result<()> {
        let mut radio = Sx127x::init(FakeBus::new(), LoraSettings::default())?;
        assert!(radio.write_payload(&[b'A'; MAX_PAYLOAD + 1]).is_err());
        Ok(())
    }

    #[test]
    fn receive_path_reads_packet_at_current_address() -> Result<()> {
        let bus = FakeBus::new();
        let mut radio = Sx127x::init(bus.clone(), LoraSettings::default())?;
        radio.set_mode(RadioMode::ReceiveContinuous)?;
        assert_eq!(radio.take_received()?, None);

        {
            let mut chip = bus.0.lock().unwrap();
            chip.registers[REG_IRQ_FLAGS as usize] = IRQ_RX_DONE | IRQ_VALID_HEADER;
            chip.registers[REG_RX_NB_BYTES as usize] = 4;
            chip.registers[REG_FIFO_RX_CURRENT_ADDR as usize] = 0x10;
            chip.fifo_pending.extend(b"ping");
        }
        assert_eq!(radio.take_received()?, Some(b"ping".to_vec()));
        assert_eq!(bus.register(REG_IRQ_FLAGS), 0);
        assert_eq!(bus.register(REG_FIFO_ADDR_PTR), 0x10);
        Ok(())
    }

    #[test]
    fn crc_failure_is_reported_and_cleared() -> Result<()> {
        let bus = FakeBus::new();
        let mut radio = Sx127x::init(bus.clone(), LoraSettings::default())?;
        bus.set_register(REG_IRQ_FLAGS, IRQ_RX_DONE | IRQ_PAYLOAD_CRC_ERROR);
        assert!(radio.take_received().is_err());
        assert_eq!(bus.register(REG_IRQ_FLAGS), 0);
        Ok(())
    }

    #[test]
    fn release_reaches_the_bus() -> Result<()> {
        let bus = FakeBus::new();
        let mut radio = Sx127x::init(bus.clone(), LoraSettings::default())?;
        radio.release()?;
        assert!(bus.0.lock().unwrap().released);
        Ok(())
    }
}
