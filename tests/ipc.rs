use std::thread;
use std::time::Duration;

use chilena_ulib::api::ipc::recv_into;
use chilena_ulib::sim::{Config, Machine};
use chilena_ulib::sys::syscall::Syscall;
use chilena_ulib::{find_env, recv, send, EnvId, EnvType, Error, Perm, Process, Received};
use x86_64::VirtAddr;

const SRC: u64 = 0x1000_0000;
const DST: u64 = 0x2000_0000;

fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn value_without_page() {
    init_log();
    let machine = Machine::boot(Config::default());
    let p = machine.create_env(EnvType::User).unwrap();
    let q = machine.create_env(EnvType::User).unwrap();

    let q_env = machine.attach(q).unwrap();
    let receiver = thread::spawn(move || {
        let proc = Process::start(q_env);
        recv(&proc, None).unwrap()
    });

    let proc = Process::start(machine.attach(p).unwrap());
    send(&proc, q, 7, None, Perm::empty());

    let msg = receiver.join().unwrap();
    assert_eq!(msg, Received { value: 7, from: p, perm: Perm::empty() });
}

#[test]
fn page_arrives_intact() {
    init_log();
    let machine = Machine::boot(Config::default());
    let p = machine.create_env(EnvType::User).unwrap();
    let q = machine.create_env(EnvType::User).unwrap();

    let sender = Process::start(machine.attach(p).unwrap());
    let src = VirtAddr::new(SRC);
    sender.kernel().page_alloc(EnvId::SELF, src, Perm::RW).unwrap();
    let pattern: Vec<u8> = (0..4096u32).map(|i| (i * 7 % 251) as u8).collect();
    sender.write(src, &pattern);

    let q_env = machine.attach(q).unwrap();
    let receiver = thread::spawn(move || {
        let proc = Process::start(q_env);
        let msg = recv(&proc, Some(VirtAddr::new(DST))).unwrap();
        let mut page = vec![0u8; 4096];
        proc.read(VirtAddr::new(DST), &mut page);
        (msg, page)
    });

    send(&sender, q, 0xC0FFEE, Some(src), Perm::RO);

    let (msg, page) = receiver.join().unwrap();
    assert_eq!(msg.value, 0xC0FFEE);
    assert_eq!(msg.from, p);
    assert_eq!(msg.perm, Perm::RO);
    assert_eq!(page, pattern);
}

#[test]
fn page_refused_by_receiver() {
    init_log();
    let machine = Machine::boot(Config::default());
    let p = machine.create_env(EnvType::User).unwrap();
    let q = machine.create_env(EnvType::User).unwrap();

    let sender = Process::start(machine.attach(p).unwrap());
    let src = VirtAddr::new(SRC);
    sender.kernel().page_alloc(EnvId::SELF, src, Perm::RW).unwrap();

    let q_env = machine.attach(q).unwrap();
    let receiver = thread::spawn(move || recv(&Process::start(q_env), None).unwrap());

    send(&sender, q, 1, Some(src), Perm::RW);
    assert_eq!(receiver.join().unwrap().perm, Perm::empty());
}

#[test]
fn sender_waits_for_late_receiver() {
    init_log();
    let machine = Machine::boot(Config::default());
    let p = machine.create_env(EnvType::User).unwrap();
    let q = machine.create_env(EnvType::User).unwrap();

    let p_env = machine.attach(p).unwrap();
    let sender = thread::spawn(move || {
        let proc = Process::start(p_env);
        for value in 1..=3 {
            send(&proc, q, value, None, Perm::empty());
        }
    });

    let proc = Process::start(machine.attach(q).unwrap());
    thread::sleep(Duration::from_millis(50));
    let got: Vec<u32> = (0..3).map(|_| recv(&proc, None).unwrap().value).collect();

    sender.join().unwrap();
    assert_eq!(got, vec![1, 2, 3]);
}

#[test]
fn unaligned_destination_is_rejected() {
    init_log();
    let machine = Machine::boot(Config::default());
    let q = machine.create_env(EnvType::User).unwrap();
    let proc = Process::start(machine.attach(q).unwrap());

    let bad = Some(VirtAddr::new(DST + 0x10));
    assert_eq!(recv(&proc, bad), Err(Error::Invalid));

    let mut from = EnvId(0x1234);
    let mut perm = Perm::RW;
    assert_eq!(recv_into(&proc, bad, Some(&mut from), Some(&mut perm)), Err(Error::Invalid));
    assert_eq!(from, EnvId::NONE);
    assert!(perm.is_empty());
}

#[test]
#[should_panic(expected = "bad environment")]
fn send_to_missing_env_is_fatal() {
    init_log();
    let machine = Machine::boot(Config::default());
    let p = machine.create_env(EnvType::User).unwrap();
    let proc = Process::start(machine.attach(p).unwrap());
    send(&proc, EnvId(0x7777), 1, None, Perm::empty());
}

#[test]
fn discovery_by_type() {
    init_log();
    let machine = Machine::boot(Config::default());
    let me = machine.create_env(EnvType::User).unwrap();
    let proc = Process::start(machine.attach(me).unwrap());

    assert_eq!(find_env(&proc, EnvType::Fs), EnvId::NONE);

    let fs = machine.create_env(EnvType::Fs).unwrap();
    assert_eq!(find_env(&proc, EnvType::Fs), fs);
    assert_eq!(find_env(&proc, EnvType::Ns), EnvId::NONE);

    machine.env_destroy(fs, fs).unwrap();
    assert_eq!(find_env(&proc, EnvType::Fs), EnvId::NONE);
}
