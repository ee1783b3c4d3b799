//! Context keys shared between steps and external provisioning hooks.
//!
//! The names are part of the hook contract and must not change.

pub const SERVER_UUID: &str = "server_uuid";
pub const BOOT_STORAGE_UUID: &str = "boot_storage_uuid";
pub const SECONDARY_STORAGE_UUID: &str = "secondary_storage_uuid";
pub const IP_ADDR_UUID: &str = "ip_addr_uuid";
pub const SERVER_IP: &str = "server_ip";
pub const PUBLIC_NETWORK_UUID: &str = "public_network_uuid";
pub const ISO_IMAGE_UUID: &str = "iso_image_uuid";
pub const SSH_KEY_UUID: &str = "ssh_key_uuid";
pub const SNAPSHOT_UUID: &str = "snapshot_uuid";
pub const TEMPLATE_UUID: &str = "template_uuid";

pub const SERVER_BOOT_STORAGE_LINKED: &str = "server_boot_storage_linked";
pub const SERVER_SECONDARY_STORAGE_LINKED: &str = "server_secondary_storage_linked";
pub const SERVER_IP_ADDR_LINKED: &str = "server_ip_addr_linked";
pub const SERVER_PUBLIC_NETWORK_LINKED: &str = "server_public_network_linked";
pub const SERVER_ISO_IMAGE_LINKED: &str = "server_iso_image_linked";

pub const ERROR: &str = "error";
pub const HTTP_IP: &str = "http_ip";
pub const HTTP_PORT: &str = "http_port";

pub const FILE_SERVER_UUID: &str = "file_server_uuid";
pub const FILE_SERVER_STORAGE_UUID: &str = "file_server_storage_uuid";
pub const FILE_SERVER_IP_UUID: &str = "file_server_ip_uuid";
pub const VNC_CONN: &str = "vnc_conn";
pub const SSH_PRIVATE_KEY: &str = "ssh_private_key";

pub const BUILD_NAME: &str = "build_name";
pub const TEMPLATE_NAME: &str = "template_name";
