use crate::dp::Slave;
use core::fmt;

/// Storage type that can hold one slave.
#[derive(Default)]
pub struct SlaveStorage<'a> {
    inner: Option<Slave<'a>>,
}

/// Handle that can be used to obtain a slave from the DP master.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlaveHandle {
    index: u8,
    address: u8,
}

impl SlaveHandle {
    #[inline(always)]
    pub fn address(self) -> u8 {
        self.address
    }

    pub(crate) fn index(self) -> usize {
        usize::from(self.index)
    }
}

impl fmt::Display for SlaveHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Station {}", self.address)
    }
}

/// Arena of all slaves managed by one DP master
///
/// Slaves are stored in caller-provided storage (an array of
/// [`SlaveStorage`]) or in an owned `Vec` and referred to by integer
/// [`SlaveHandle`]s, so no cyclic references between the master and its
/// slaves exist.
pub struct SlaveSet<'a> {
    slaves: managed::ManagedSlice<'a, SlaveStorage<'a>>,
}

impl<'a> SlaveSet<'a> {
    pub fn new<S>(storage: S) -> Self
    where
        S: Into<managed::ManagedSlice<'a, SlaveStorage<'a>>>,
    {
        Self {
            slaves: storage.into(),
        }
    }

    /// Add a slave to the set, and return its handle.
    ///
    /// # Panics
    /// This function panics if the storage is fixed-size (not a `Vec`) and is full, or when a
    /// slave with the same address is already part of the set.
    pub fn add(&mut self, slave: Slave<'a>) -> SlaveHandle {
        assert!(
            self.iter().all(|(_, s)| s.address() != slave.address()),
            "slave #{} was added twice",
            slave.address()
        );

        for (index, slot) in self.slaves.iter_mut().enumerate() {
            if slot.inner.is_none() {
                let address = slave.address();
                slot.inner = Some(slave);
                return SlaveHandle {
                    index: u8::try_from(index).unwrap(),
                    address,
                };
            }
        }

        match &mut self.slaves {
            managed::ManagedSlice::Borrowed(_) => panic!("Adding slave to full SlaveSet"),
            managed::ManagedSlice::Owned(slaves) => {
                let address = slave.address();
                slaves.push(SlaveStorage { inner: Some(slave) });
                SlaveHandle {
                    index: (slaves.len() - 1).try_into().unwrap(),
                    address,
                }
            }
        }
    }

    /// Number of storage slots (not necessarily occupied).
    pub(crate) fn capacity(&self) -> usize {
        self.slaves.len()
    }

    /// Get a slave from the set by its handle.
    ///
    /// # Panics
    /// This function may panic if the handle does not belong to this slave set.
    pub fn get(&self, handle: SlaveHandle) -> &Slave<'a> {
        self.slaves[handle.index()]
            .inner
            .as_ref()
            .expect("Handle does not refer to a valid slave")
    }

    /// Get a slave from the set by its handle, as mutable.
    ///
    /// # Panics
    /// This function may panic if the handle does not belong to this slave set.
    pub fn get_mut(&mut self, handle: SlaveHandle) -> &mut Slave<'a> {
        self.slaves[handle.index()]
            .inner
            .as_mut()
            .expect("Handle does not refer to a valid slave")
    }

    /// Get the slave in the given storage slot, if any.
    pub(crate) fn get_slot_mut(&mut self, index: usize) -> Option<(SlaveHandle, &mut Slave<'a>)> {
        let slot = self.slaves.get_mut(index)?;
        slot.inner.as_mut().map(|s| {
            (
                SlaveHandle {
                    index: u8::try_from(index).unwrap(),
                    address: s.address(),
                },
                s,
            )
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (SlaveHandle, &Slave<'a>)> {
        self.slaves.iter().enumerate().filter_map(|(i, s)| {
            s.inner.as_ref().map(|s| {
                (
                    SlaveHandle {
                        index: u8::try_from(i).unwrap(),
                        address: s.address(),
                    },
                    s,
                )
            })
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (SlaveHandle, &mut Slave<'a>)> {
        self.slaves.iter_mut().enumerate().filter_map(|(i, s)| {
            s.inner.as_mut().map(|s| {
                (
                    SlaveHandle {
                        index: u8::try_from(i).unwrap(),
                        address: s.address(),
                    },
                    s,
                )
            })
        })
    }
}
