#![no_main]
use libfuzzer_sys::fuzz_target;
use tanklab_hardware::firmata::{FirmataEvent, FrameDecoder};

fuzz_target!(|data: &[u8]| {
    let mut dec = FrameDecoder::new();
    let mut out = Vec::new();
    dec.extend(data, &mut out);
    for ev in out {
        match ev {
            FirmataEvent::Analog { channel, value } => {
                assert!(channel < 16);
                assert!(value < (1 << 14));
            }
            FirmataEvent::DigitalPort { port, .. } => assert!(port < 16),
            FirmataEvent::Version { major, minor } => assert!(major < 128 && minor < 128),
        }
    }
});
