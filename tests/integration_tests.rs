use libcancore::controller::{
    BufferEvent, ConfigFlags, Delivery, Direction, Driver, Fifo, Handlers, PortConfig,
};
use libcancore::data_link::{
    BusState, CanMode, ControllerState, ErrorType, OperatingMode, StateReport,
};
use libcancore::error::{CoreError, ErrorKind};
use libcancore::physical::bitrate::{DataBitrate, NominalBitrate};
use libcancore::physical::virtual_can::VirtualHardware;
use libcancore::types::{CanId, CanMessage, Channel, MsgFlags};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

// Core log output is shown with e.g. RUST_LOG=libcancore=debug
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[test]
fn test_transmit_single_frame() {
    init_tracing();
    let driver = Driver::new(VirtualHardware::new(1));
    let port = driver
        .init(Channel::Channel1, PortConfig::default())
        .unwrap();

    port.bitrate(NominalBitrate::Rate500K, DataBitrate::None)
        .unwrap();
    let payload = [0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88];
    port.buffer_config(1, 0x100, 0, MsgFlags::NONE, Direction::Transmit)
        .unwrap();
    port.buffer_set_dlc(1, 8).unwrap();
    port.buffer_set_data(1, &payload, 0).unwrap();
    port.can_mode(CanMode::Start).unwrap();
    assert_eq!(port.buffer_send(1), Ok(()));

    let sent = driver.hardware().sent(Channel::Channel1);
    assert_eq!(sent.len(), 1);
    let (index, frame) = sent[0];
    assert_eq!(index, 1);
    assert_eq!(frame.id, CanId::Standard(0x100));
    assert_eq!(frame.dlc, 8);
    assert_eq!(frame.payload(), &payload);
    assert_eq!(port.statistic().unwrap().transmitted, 1);
}

#[test]
fn test_receive_fifo_overflow() {
    init_tracing();
    let driver = Driver::new(VirtualHardware::new(1));
    let port = driver
        .init(Channel::Channel1, PortConfig::default())
        .unwrap();
    port.buffer_config(2, 0x200, 0x7FF, MsgFlags::NONE, Direction::Receive)
        .unwrap();
    port.fifo_config(2, Fifo::new(4).unwrap()).unwrap();
    port.can_mode(CanMode::Start).unwrap();

    let events = port.events();
    let results: Vec<_> = (0..6u8)
        .map(|n| {
            let frame = CanMessage::new(CanId::Standard(0x200), &[n]).unwrap();
            events.fifo_event(2, BufferEvent::Received(frame))
        })
        .collect();
    assert!(results[..4].iter().all(|r| r.is_ok()));
    assert!(results[4..]
        .iter()
        .all(|r| r.as_ref().unwrap_err().kind() == ErrorKind::BufferOverflow));

    let mut out = [CanMessage::default(); 10];
    let read = port.fifo_read(2, &mut out).unwrap();
    assert_eq!(read, 4);
    for (n, frame) in out[..read].iter().enumerate() {
        assert_eq!(frame.payload(), &[n as u8]);
    }
    assert_eq!(port.statistic().unwrap().lost, 2);
}

#[test]
fn test_use_after_release() {
    init_tracing();
    let driver = Driver::new(VirtualHardware::new(1));
    let port = driver
        .init(Channel::Channel1, PortConfig::default())
        .unwrap();
    port.release().unwrap();

    assert_eq!(port.buffer_send(1), Err(CoreError::NotInitialized));
    assert_eq!(port.can_mode(CanMode::Start), Err(CoreError::NotInitialized));
    assert_eq!(port.release(), Err(CoreError::NotInitialized));

    // The channel can be opened again
    let port = driver
        .init(Channel::Channel1, PortConfig::default())
        .unwrap();
    assert_eq!(port.can_state().unwrap().mode, OperatingMode::Stopped);
}

#[test]
fn test_bus_off_stops_controller() {
    init_tracing();
    let driver = Driver::new(VirtualHardware::new(1));
    let port = driver
        .init(Channel::Channel1, PortConfig::default())
        .unwrap();

    let calls = Arc::new(AtomicU32::new(0));
    let calls_clone = calls.clone();
    port.int_functions(Handlers::new().on_error(move |state: &ControllerState| {
        assert_eq!(state.bus, BusState::BusOff);
        calls_clone.fetch_add(1, Ordering::SeqCst);
    }))
    .unwrap();
    port.can_mode(CanMode::StopOnBusError).unwrap();

    port.events()
        .state_changed(StateReport::with_counters(BusState::BusOff, 255, 0))
        .unwrap();
    port.events()
        .state_changed(StateReport::with_counters(BusState::BusOff, 255, 0))
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let state = port.can_state().unwrap();
    assert_eq!(state.bus, BusState::BusOff);
    assert_eq!(state.mode, OperatingMode::StoppedOnBusError);
    assert_eq!(state.tx_errors, 255);
    assert_eq!(
        driver.hardware().mode(Channel::Channel1),
        OperatingMode::Stopped
    );
}

#[test]
fn test_loopback_between_channels() {
    init_tracing();
    // Frames accepted on channel 1 are replayed as receptions on channel 2
    let hardware = VirtualHardware::new(2);
    let wire = Arc::new(Mutex::new(Vec::new()));
    let wire_clone = wire.clone();
    hardware.set_transmit_handler(Some(Box::new(
        move |channel: Channel, frame: &CanMessage| -> Result<(), CoreError> {
            if channel == Channel::Channel1 {
                wire_clone.lock().unwrap().push(*frame);
            }
            Ok(())
        },
    )));

    let driver = Driver::new(hardware);
    let tx = driver
        .init(Channel::Channel1, PortConfig::default())
        .unwrap();
    let rx = driver
        .init(Channel::Channel2, PortConfig::new(ConfigFlags::TIMESTAMPS))
        .unwrap();

    tx.buffer_config(1, 0x18DA_F110, 0, MsgFlags::EXT, Direction::Transmit)
        .unwrap();
    tx.fifo_config(1, Fifo::new(8).unwrap()).unwrap();
    rx.buffer_config(1, 0x18DA_F100, 0x1FFF_FF00, MsgFlags::EXT, Direction::Receive)
        .unwrap();
    rx.fifo_config(1, Fifo::new(8).unwrap()).unwrap();

    let echoed = Arc::new(AtomicU32::new(0));
    let echoed_clone = echoed.clone();
    rx.int_functions(Handlers::new().on_receive(move |frame: &CanMessage, _| {
        echoed_clone.fetch_add(1, Ordering::SeqCst);
        if frame.payload().first() == Some(&0x3E) {
            // Tester-present frames are handled inline
            Delivery::Consumed
        } else {
            Delivery::Forward
        }
    }))
    .unwrap();

    tx.can_mode(CanMode::Start).unwrap();
    rx.can_mode(CanMode::ListenOnly).unwrap();

    let frames = [
        CanMessage::new(CanId::Extended(0x18DA_F110), &[0x02, 0x10, 0x03]).unwrap(),
        CanMessage::new(CanId::Extended(0x18DA_F110), &[0x3E, 0x00]).unwrap(),
        CanMessage::new(CanId::Extended(0x18DA_F110), &[0x03, 0x22, 0xF1, 0x90]).unwrap(),
    ];
    assert_eq!(tx.fifo_write(1, &frames).unwrap(), 3);

    let tx_events = tx.events();
    let rx_events = rx.events();
    let mut delivered = 0;
    while delivered < frames.len() {
        let pending: Vec<_> = wire.lock().unwrap().drain(..).collect();
        for frame in pending {
            assert_eq!(rx_events.frame_received(frame).unwrap(), Some(1));
            tx_events.fifo_event(1, BufferEvent::Transmitted).unwrap();
            delivered += 1;
        }
    }

    assert_eq!(echoed.load(Ordering::SeqCst), 3);
    let mut out = [CanMessage::default(); 8];
    assert_eq!(rx.fifo_read(1, &mut out).unwrap(), 2);
    assert_eq!(out[0].payload(), &[0x02, 0x10, 0x03]);
    assert_eq!(out[1].payload(), &[0x03, 0x22, 0xF1, 0x90]);
    assert_eq!(tx.statistic().unwrap().transmitted, 3);
    assert_eq!(rx.statistic().unwrap().received, 3);

    // A listen-only port never transmits
    rx.buffer_config(2, 0x100, 0, MsgFlags::NONE, Direction::Transmit)
        .unwrap();
    assert_eq!(rx.buffer_send(2).unwrap_err().kind(), ErrorKind::Mode);
}

#[test]
fn test_error_frames_reach_handler() {
    init_tracing();
    let driver = Driver::new(VirtualHardware::new(1));
    let port = driver
        .init(Channel::Channel1, PortConfig::new(ConfigFlags::ERROR_FRAMES))
        .unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = seen.clone();
    port.int_functions(Handlers::new().on_error(move |state: &ControllerState| {
        seen_clone.lock().unwrap().push(state.last_error);
    }))
    .unwrap();
    port.can_mode(CanMode::Start).unwrap();

    let events = port.events();
    events.error_frame(ErrorType::Stuff).unwrap();
    events.error_frame(ErrorType::Bit0).unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        vec![ErrorType::Stuff, ErrorType::Bit0]
    );
    assert_eq!(port.statistic().unwrap().errors, 2);
}
