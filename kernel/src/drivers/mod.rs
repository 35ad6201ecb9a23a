/// Device drivers.
///
/// - `pci`: configuration-space access and device discovery
/// - `rtl8139`: Realtek RTL8139 Fast Ethernet controller (polling mode)
pub mod pci;
pub mod rtl8139;
