//! Mount option list construction.

use nix::mount::MsFlags;

/// Options controlling how a filesystem is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountOptions {
    /// Subtype; the kernel filesystem type becomes `fuse.<name>`.
    pub name: String,

    /// Mount source shown in the mount table.
    pub fs_name: String,

    /// Let users other than the mounting one access the filesystem.
    pub allow_other: bool,

    /// Retry through the setuid `fusermount` helper when mount(2) returns
    /// `EPERM`.
    pub fusermount_fallback: bool,

    /// Extra options appended after the standard ones.
    pub extra: Vec<String>,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            name: "hellofs".to_string(),
            fs_name: "hellofs".to_string(),
            allow_other: false,
            fusermount_fallback: true,
            extra: Vec::new(),
        }
    }
}

impl MountOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_fs_name(mut self, fs_name: impl Into<String>) -> Self {
        self.fs_name = fs_name.into();
        self
    }

    pub fn with_allow_other(mut self, allow_other: bool) -> Self {
        self.allow_other = allow_other;
        self
    }

    pub fn with_fusermount_fallback(mut self, enabled: bool) -> Self {
        self.fusermount_fallback = enabled;
        self
    }

    pub fn with_option(mut self, option: impl Into<String>) -> Self {
        self.extra.push(option.into());
        self
    }

    /// Kernel filesystem type, `fuse.<name>`.
    pub fn fs_type(&self) -> String {
        format!("fuse.{}", self.name)
    }

    /// Full option list for a direct mount, in the order the kernel sees it.
    pub fn option_list(&self, fd: i32, uid: u32, gid: u32) -> Vec<String> {
        let mut options = vec![
            "nosuid".to_string(),
            "nodev".to_string(),
            format!("fd={}", fd),
            format!("rootmode=0{:o}", libc::S_IFDIR),
            format!("user_id={}", uid),
            format!("group_id={}", gid),
        ];
        if self.allow_other {
            options.push("allow_other".to_string());
        }
        options.extend(self.extra.iter().cloned());
        options
    }

    /// Options passed to `fusermount -o`; the helper adds the descriptor and
    /// ownership options itself.
    pub fn helper_options(&self) -> String {
        let mut options = vec![
            format!("fsname={}", self.fs_name),
            format!("subtype={}", self.name),
        ];
        if self.allow_other {
            options.push("allow_other".to_string());
        }
        options.extend(self.extra.iter().cloned());
        options.join(",")
    }
}

/// Split an option list into mount flags and the data string.
///
/// Flag-like options set or clear `MS_*` bits the way mount(8) does; anything
/// else is passed through, comma-joined, as filesystem data.
pub fn split_flags(options: &[String]) -> (MsFlags, String) {
    let mut flags = MsFlags::empty();
    let mut data = Vec::new();
    for option in options {
        match flag_for(option) {
            Some((clear, flag)) => {
                if clear {
                    flags.remove(flag);
                } else {
                    flags.insert(flag);
                }
            }
            None => data.push(option.as_str()),
        }
    }
    (flags, data.join(","))
}

fn flag_for(option: &str) -> Option<(bool, MsFlags)> {
    let entry = match option {
        "async" => (true, MsFlags::MS_SYNCHRONOUS),
        "atime" => (true, MsFlags::MS_NOATIME),
        "bind" => (false, MsFlags::MS_BIND),
        "defaults" => (false, MsFlags::empty()),
        "dev" => (true, MsFlags::MS_NODEV),
        "diratime" => (true, MsFlags::MS_NODIRATIME),
        "dirsync" => (false, MsFlags::MS_DIRSYNC),
        "exec" => (true, MsFlags::MS_NOEXEC),
        "mand" => (false, MsFlags::MS_MANDLOCK),
        "noatime" => (false, MsFlags::MS_NOATIME),
        "nodev" => (false, MsFlags::MS_NODEV),
        "nodiratime" => (false, MsFlags::MS_NODIRATIME),
        "noexec" => (false, MsFlags::MS_NOEXEC),
        "nomand" => (true, MsFlags::MS_MANDLOCK),
        "norelatime" => (true, MsFlags::MS_RELATIME),
        "nostrictatime" => (true, MsFlags::MS_STRICTATIME),
        "nosuid" => (false, MsFlags::MS_NOSUID),
        "rbind" => (false, MsFlags::MS_BIND | MsFlags::MS_REC),
        "relatime" => (false, MsFlags::MS_RELATIME),
        "remount" => (false, MsFlags::MS_REMOUNT),
        "ro" => (false, MsFlags::MS_RDONLY),
        "rw" => (true, MsFlags::MS_RDONLY),
        "strictatime" => (false, MsFlags::MS_STRICTATIME),
        "suid" => (true, MsFlags::MS_NOSUID),
        "sync" => (false, MsFlags::MS_SYNCHRONOUS),
        _ => return None,
    };
    Some(entry)
}
