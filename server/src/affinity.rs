//! CPU affinity for loop threads.

use crate::error::Error;
use std::io;

/// Pin the current thread to one CPU.
///
/// Uses `sched_setaffinity` on Linux; elsewhere the request is ignored.
#[cfg(target_os = "linux")]
pub fn set_cpu_affinity(cpu: usize) -> io::Result<()> {
    let mut set = unsafe { std::mem::zeroed::<libc::cpu_set_t>() };
    unsafe {
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(cpu, &mut set);
    }
    let rc = unsafe { libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Pin the current thread to one CPU (no-op off Linux).
#[cfg(not(target_os = "linux"))]
pub fn set_cpu_affinity(_cpu: usize) -> io::Result<()> {
    Ok(())
}

/// Parse a Linux-style CPU list, e.g. `"0-3,6,8-9"`.
pub fn parse_cpu_list(list: &str) -> Result<Vec<usize>, Error> {
    let bad = |what: &str| Error::Config(format!("{what} in cpu list `{list}`"));
    let mut cpus = Vec::new();
    for part in list.split(',') {
        let part = part.trim();
        if part.is_empty() {
            return Err(bad("empty entry"));
        }
        match part.split_once('-') {
            Some((start, end)) => {
                let start: usize = start.parse().map_err(|_| bad("invalid cpu"))?;
                let end: usize = end.parse().map_err(|_| bad("invalid cpu"))?;
                if end < start {
                    return Err(bad("descending range"));
                }
                cpus.extend(start..=end);
            }
            None => cpus.push(part.parse().map_err(|_| bad("invalid cpu"))?),
        }
    }
    Ok(cpus)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_cpus_and_ranges() {
        assert_eq!(parse_cpu_list("0").unwrap(), vec![0]);
        assert_eq!(parse_cpu_list("0-3").unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(parse_cpu_list("0-2,5").unwrap(), vec![0, 1, 2, 5]);
        assert_eq!(parse_cpu_list("1, 3-4").unwrap(), vec![1, 3, 4]);
    }

    #[test]
    fn rejects_malformed_lists() {
        assert!(parse_cpu_list("").is_err());
        assert!(parse_cpu_list("a").is_err());
        assert!(parse_cpu_list("3-1").is_err());
        assert!(parse_cpu_list("0,,2").is_err());
    }
}
