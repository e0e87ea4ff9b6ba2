//! Linux x86-64 syscall table and libc wrapper-name aliases.

use std::collections::HashMap;

/// Table size for the x86-64 kernel ABI, from asm/unistd_64.h.
/// A resolved syscall id is only accepted when it is below this bound.
pub const MAX_SYSCALL: u32 = 335;

/// Syscall names indexed by number (0..MAX_SYSCALL).
pub static SYSCALL_NAMES: [&str; 335] = [
    "read", "write", "open", "close", "stat", "fstat", "lstat", "poll",
    "lseek", "mmap", "mprotect", "munmap", "brk", "rt_sigaction",
    "rt_sigprocmask", "rt_sigreturn", "ioctl", "pread64", "pwrite64",
    "readv", "writev", "access", "pipe", "select", "sched_yield", "mremap",
    "msync", "mincore", "madvise", "shmget", "shmat", "shmctl", "dup",
    "dup2", "pause", "nanosleep", "getitimer", "alarm", "setitimer",
    "getpid", "sendfile", "socket", "connect", "accept", "sendto",
    "recvfrom", "sendmsg", "recvmsg", "shutdown", "bind", "listen",
    "getsockname", "getpeername", "socketpair", "setsockopt", "getsockopt",
    "clone", "fork", "vfork", "execve", "exit", "wait4", "kill", "uname",
    "semget", "semop", "semctl", "shmdt", "msgget", "msgsnd", "msgrcv",
    "msgctl", "fcntl", "flock", "fsync", "fdatasync", "truncate",
    "ftruncate", "getdents", "getcwd", "chdir", "fchdir", "rename",
    "mkdir", "rmdir", "creat", "link", "unlink", "symlink", "readlink",
    "chmod", "fchmod", "chown", "fchown", "lchown", "umask",
    "gettimeofday", "getrlimit", "getrusage", "sysinfo", "times", "ptrace",
    "getuid", "syslog", "getgid", "setuid", "setgid", "geteuid",
    "getegid", "setpgid", "getppid", "getpgrp", "setsid", "setreuid",
    "setregid", "getgroups", "setgroups", "setresuid", "getresuid",
    "setresgid", "getresgid", "getpgid", "setfsuid", "setfsgid", "getsid",
    "capget", "capset", "rt_sigpending", "rt_sigtimedwait",
    "rt_sigqueueinfo", "rt_sigsuspend", "sigaltstack", "utime", "mknod",
    "uselib", "personality", "ustat", "statfs", "fstatfs", "sysfs",
    "getpriority", "setpriority", "sched_setparam", "sched_getparam",
    "sched_setscheduler", "sched_getscheduler", "sched_get_priority_max",
    "sched_get_priority_min", "sched_rr_get_interval", "mlock", "munlock",
    "mlockall", "munlockall", "vhangup", "modify_ldt", "pivot_root",
    "_sysctl", "prctl", "arch_prctl", "adjtimex", "setrlimit", "chroot",
    "sync", "acct", "settimeofday", "mount", "umount2", "swapon",
    "swapoff", "reboot", "sethostname", "setdomainname", "iopl", "ioperm",
    "create_module", "init_module", "delete_module", "get_kernel_syms",
    "query_module", "quotactl", "nfsservctl", "getpmsg", "putpmsg",
    "afs_syscall", "tuxcall", "security", "gettid", "readahead",
    "setxattr", "lsetxattr", "fsetxattr", "getxattr", "lgetxattr",
    "fgetxattr", "listxattr", "llistxattr", "flistxattr", "removexattr",
    "lremovexattr", "fremovexattr", "tkill", "time", "futex",
    "sched_setaffinity", "sched_getaffinity", "set_thread_area",
    "io_setup", "io_destroy", "io_getevents", "io_submit", "io_cancel",
    "get_thread_area", "lookup_dcookie", "epoll_create", "epoll_ctl_old",
    "epoll_wait_old", "remap_file_pages", "getdents64", "set_tid_address",
    "restart_syscall", "semtimedop", "fadvise64", "timer_create",
    "timer_settime", "timer_gettime", "timer_getoverrun", "timer_delete",
    "clock_settime", "clock_gettime", "clock_getres", "clock_nanosleep",
    "exit_group", "epoll_wait", "epoll_ctl", "tgkill", "utimes",
    "vserver", "mbind", "set_mempolicy", "get_mempolicy", "mq_open",
    "mq_unlink", "mq_timedsend", "mq_timedreceive", "mq_notify",
    "mq_getsetattr", "kexec_load", "waitid", "add_key", "request_key",
    "keyctl", "ioprio_set", "ioprio_get", "inotify_init",
    "inotify_add_watch", "inotify_rm_watch", "migrate_pages", "openat",
    "mkdirat", "mknodat", "fchownat", "futimesat", "newfstatat",
    "unlinkat", "renameat", "linkat", "symlinkat", "readlinkat",
    "fchmodat", "faccessat", "pselect6", "ppoll", "unshare",
    "set_robust_list", "get_robust_list", "splice", "tee",
    "sync_file_range", "vmsplice", "move_pages", "utimensat",
    "epoll_pwait", "signalfd", "timerfd_create", "eventfd", "fallocate",
    "timerfd_settime", "timerfd_gettime", "accept4", "signalfd4",
    "eventfd2", "epoll_create1", "dup3", "pipe2", "inotify_init1",
    "preadv", "pwritev", "rt_tgsigqueueinfo", "perf_event_open",
    "recvmmsg", "fanotify_init", "fanotify_mark", "prlimit64",
    "name_to_handle_at", "open_by_handle_at", "clock_adjtime", "syncfs",
    "sendmmsg", "setns", "getcpu", "process_vm_readv",
    "process_vm_writev", "kcmp", "finit_module", "sched_setattr",
    "sched_getattr", "renameat2", "seccomp", "getrandom", "memfd_create",
    "kexec_file_load", "bpf", "execveat", "userfaultfd", "membarrier",
    "mlock2", "copy_file_range", "preadv2", "pwritev2", "pkey_mprotect",
    "pkey_alloc", "pkey_free", "statx", "io_pgetevents", "rseq",
];

/// Libc wrapper names that stand in for a syscall wrapper under another
/// name (LFS 64-bit variants, internal underscore-prefixed entry points).
static ALIASES: [(&str, &str); 34] = [
    ("__open", "open"),
    ("__open64", "open"),
    ("open64", "open"),
    ("__openat64", "openat"),
    ("openat64", "openat"),
    ("creat64", "creat"),
    ("__read", "read"),
    ("__write", "write"),
    ("__close", "close"),
    ("__dup2", "dup2"),
    ("__lseek", "lseek"),
    ("lseek64", "lseek"),
    ("__pread64", "pread64"),
    ("pread", "pread64"),
    ("__pwrite64", "pwrite64"),
    ("pwrite", "pwrite64"),
    ("__mmap", "mmap"),
    ("mmap64", "mmap"),
    ("__munmap", "munmap"),
    ("__brk", "brk"),
    ("__sbrk", "brk"),
    ("__ioctl", "ioctl"),
    ("__fcntl", "fcntl"),
    ("fcntl64", "fcntl"),
    ("truncate64", "truncate"),
    ("ftruncate64", "ftruncate"),
    ("fallocate64", "fallocate"),
    ("statfs64", "statfs"),
    ("fstatfs64", "fstatfs"),
    ("__poll", "poll"),
    ("__select", "select"),
    ("__fork", "fork"),
    ("__vfork", "vfork"),
    ("__getpid", "getpid"),
];

/// Name of a syscall number, if it is within the table.
pub fn name(number: u32) -> Option<&'static str> {
    SYSCALL_NAMES.get(number as usize).copied()
}

/// Read-only name -> number lookup, with wrapper-alias canonicalization.
pub struct SyscallTable {
    by_name: HashMap<&'static str, u32>,
    aliases: HashMap<&'static str, &'static str>,
}

impl SyscallTable {
    pub fn new() -> Self {
        let by_name = SYSCALL_NAMES
            .iter()
            .enumerate()
            .map(|(n, &name)| (name, n as u32))
            .collect();
        let aliases = ALIASES.iter().copied().collect();
        Self { by_name, aliases }
    }

    pub fn number(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).copied()
    }

    /// Number for a symbol name, looking through the alias table first.
    /// This is how symbol-table entries are matched against syscalls.
    pub fn resolve_symbol(&self, symbol: &str) -> Option<u32> {
        let canonical = self.aliases.get(symbol).copied().unwrap_or(symbol);
        self.number(canonical)
    }
}

impl Default for SyscallTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_matches_declared_bound() {
        assert_eq!(SYSCALL_NAMES.len(), MAX_SYSCALL as usize);
    }

    #[test]
    fn well_known_numbers() {
        let table = SyscallTable::new();
        assert_eq!(table.number("read"), Some(0));
        assert_eq!(table.number("getpid"), Some(39));
        assert_eq!(table.number("exit_group"), Some(231));
        assert_eq!(table.number("rseq"), Some(334));
        assert_eq!(name(59), Some("execve"));
        assert_eq!(name(MAX_SYSCALL), None);
    }

    #[test]
    fn aliases_resolve_to_canonical_number() {
        let table = SyscallTable::new();
        assert_eq!(table.resolve_symbol("open64"), Some(2));
        assert_eq!(table.resolve_symbol("__read"), Some(0));
        assert_eq!(table.resolve_symbol("pwrite"), Some(18));
        // Unaliased names pass straight through.
        assert_eq!(table.resolve_symbol("mprotect"), Some(10));
        assert_eq!(table.resolve_symbol("not_a_syscall"), None);
    }
}
