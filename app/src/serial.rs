/// An IRQ driven serial port, carrying log output and command lines
///
pub mod uart1 {
    use crate::interrupt;
    use crate::hal::{
        pac,
        prelude::*,
        serial::{
            Event,
            Serial,
        }
    };
    use heapless::spsc::{Consumer, Producer, Queue};
    use stm32f0xx_hal::gpio::{
        gpiob,
        Alternate,
        AF0,
    };

    const TX_Q_SIZE: usize = 512;
    const RX_Q_SIZE: usize = 64;

    static mut TX_Q_CONSUMER: Option<Consumer<u8, TX_Q_SIZE>> = None;
    static mut TX_Q_PRODUCER: Option<Producer<u8, TX_Q_SIZE>> = None;
    static mut RX_Q_CONSUMER: Option<Consumer<u8, RX_Q_SIZE>> = None;
    static mut RX_Q_PRODUCER: Option<Producer<u8, RX_Q_SIZE>> = None;

    type TxPinType = gpiob::PB6<Alternate<AF0>>;
    type RxPinType = gpiob::PB7<Alternate<AF0>>;
    static mut SERIAL: Option<Serial<pac::USART1, TxPinType, RxPinType>> = None;

    pub struct Uart1Tx {}

    impl core::fmt::Write for Uart1Tx {
        fn write_str(&mut self, s: &str) -> Result<(), core::fmt::Error> {
            for b in s.bytes() {
                write_byte(b);
            }
            Ok(())
        }
    }

    /// Must be called once during application initialization
    pub fn init(mut serial: Serial<pac::USART1, TxPinType, RxPinType>, irq_prio: u8) {
        let core = unsafe { pac::CorePeripherals::steal() };
        let mut nvic = core.NVIC;

        serial.listen(Event::Rxne);

        static mut RX_Q: Queue<u8, RX_Q_SIZE> = Queue::new();
        static mut TX_Q: Queue<u8, TX_Q_SIZE> = Queue::new();

        let (rx_q_producer, rx_q_consumer) = unsafe { RX_Q.split() };
        let (tx_q_producer, tx_q_consumer) = unsafe { TX_Q.split() };

        unsafe {
            RX_Q_PRODUCER = Some(rx_q_producer);
            RX_Q_CONSUMER = Some(rx_q_consumer);
            TX_Q_PRODUCER = Some(tx_q_producer);
            TX_Q_CONSUMER = Some(tx_q_consumer);
            SERIAL = Some(serial);

            nvic.set_priority(pac::Interrupt::USART1, irq_prio);
            pac::NVIC::unmask(pac::Interrupt::USART1);
        }
    }

    pub fn read_byte() -> Option<u8> {
        let rx_q_consumer = unsafe { RX_Q_CONSUMER.as_mut()? };
        rx_q_consumer.dequeue()
    }

    pub fn write_byte(b: u8) {
        let (Some(tx_q_producer), Some(serial)) = (unsafe { TX_Q_PRODUCER.as_mut() }, unsafe { SERIAL.as_mut() }) else {
            // Not initialized yet
            return;
        };
        // Drop the byte if the queue is full
        let _ = tx_q_producer.enqueue(b);
        serial.listen(Event::Txe);
    }

    pub fn writer() -> Uart1Tx {
        Uart1Tx {}
    }

    #[interrupt]
    fn USART1() {
        let serial = unsafe { SERIAL.as_mut().unwrap_unchecked() };
        let rx_q_producer = unsafe { RX_Q_PRODUCER.as_mut().unwrap_unchecked() };
        let tx_q_consumer = unsafe { TX_Q_CONSUMER.as_mut().unwrap_unchecked() };
        let usart1 = unsafe { crate::hal::pac::Peripherals::steal().USART1 };

        if let Ok(rxbyte) = serial.read() {
            rx_q_producer.enqueue(rxbyte).ok();
        }

        let isr = (*usart1).isr.read();
        if isr.txe().bit_is_set() {
            match tx_q_consumer.dequeue() {
                Some(b) => {
                    serial.write(b).ok();
                },
                None => {
                    // Queue drained; TXE is unmasked again by the next write_byte
                    serial.unlisten(Event::Txe);
                }
            }
        }
    }
}

/// `log` output over uart1, one line per record
pub mod logger {
    use core::fmt::Write;
    use log::{LevelFilter, Log, Metadata, Record};

    use super::uart1;

    pub struct SerialLogger {
        level: LevelFilter,
    }

    static LOGGER: SerialLogger = SerialLogger { level: LevelFilter::Info };

    impl Log for SerialLogger {
        fn enabled(&self, metadata: &Metadata) -> bool {
            metadata.level() <= self.level
        }

        fn log(&self, record: &Record) {
            if self.enabled(record.metadata()) {
                let mut w = uart1::writer();
                let _ = write!(w, "{} {}\r\n", record.level(), record.args());
            }
        }

        fn flush(&self) {}
    }

    /// Must be called once, after uart1::init and before interrupts that log
    pub fn init() {
        // cortex-m0 has no compare-and-swap, so the racy setters are the only option.
        // Nothing else is running yet.
        unsafe {
            let _ = log::set_logger_racy(&LOGGER);
            log::set_max_level_racy(LOGGER.level);
        }
    }
}
