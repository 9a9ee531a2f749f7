//! PROFIBUS Constants

/// Start Delimiter 1 (fixed length, no data unit)
pub const SD1: u8 = 0x10;
/// Start Delimiter 2 (variable data unit length)
pub const SD2: u8 = 0x68;
/// Start Delimiter 3 (fixed 8 byte data unit)
pub const SD3: u8 = 0xA2;
/// Start Delimiter 4 (token telegram)
pub const SD4: u8 = 0xDC;
/// End Delimiter
pub const ED: u8 = 0x16;
/// Short Confirmation
pub const SC: u8 = 0xE5;

/// Multicast/broadcast station address
pub const BROADCAST_ADDRESS: u8 = 127;
/// Highest valid station address
pub const MAX_STATION_ADDRESS: u8 = 125;

/// Address mask (bit 7 marks a following address extension)
pub const ADDRESS_MASK: u8 = 0x7F;
/// Address extension indicator (DSAP/SSAP byte follows in the data unit)
pub const ADDRESS_EXT: u8 = 0x80;

/// SAP for master-to-master services (reserved, master diagnostics)
pub const SAP_MASTER_MM: u8 = 54;
/// SAP for the Global_Control broadcast service
pub const SAP_GLOBAL_CONTROL: u8 = 57;
/// SAP for the Set_Slave_Address service
pub const SAP_SET_SLAVE_ADDRESS: u8 = 58;
/// SAP for the Rd_Inp service
pub const SAP_RD_INP: u8 = 59;
/// SAP for the Slave_Diagnosis service
pub const SAP_SLAVE_DIAGNOSIS: u8 = 60;
/// SAP for the Set_Prm (parameterization) service
pub const SAP_SET_PRM: u8 = 61;
/// SAP for the Chk_Cfg (configuration check) service
pub const SAP_CHK_CFG: u8 = 62;
/// Source SAP used by a class 1 master for all its slave services
pub const SAP_MASTER_MS0: u8 = 62;
