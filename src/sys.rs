use std::io;

/// CPUs this process may run on, honouring the affinity mask on Linux.
pub fn available_cpus() -> usize {
    num_cpus::get().max(1)
}

/// Current limit on open descriptors, for the exhaustion hint.
pub fn max_open_files() -> i64 {
    unsafe { libc::sysconf(libc::_SC_OPEN_MAX) as i64 }
}

pub fn pin_to_core(core_id: usize) -> io::Result<()> {
    #[cfg(target_os = "linux")]
    unsafe {
        let mut cpu_set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut cpu_set);
        libc::CPU_SET(core_id, &mut cpu_set);
        let result = libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &cpu_set);
        if result != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    #[cfg(not(target_os = "linux"))]
    let _ = core_id;
    Ok(())
}
